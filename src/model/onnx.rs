//! ONNX Runtime backend for isolation forests exported from scikit-learn.
//! Input: [n, feature_dim] f32. Outputs: `label` (i64, -1 = outlier) and
//! `scores` (f32 decision function).

use super::{OutlierDetector, Prediction};
use crate::error::ModelError;
use ndarray::Array2;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;

const LABEL_OUTPUT: &str = "label";
const SCORES_OUTPUT: &str = "scores";

pub struct OnnxDetector {
    session: Mutex<Session>,
    input_name: String,
    feature_dim: usize,
}

impl OnnxDetector {
    /// Load model from path. A missing file is fatal; there is no no-op mode.
    pub fn load(path: &Path, feature_dim: usize) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::InvalidArtifact {
                artifact: path.display().to_string(),
                reason: "onnx file not found".into(),
            });
        }
        let backend = |e: ort::Error| ModelError::Backend(e.to_string());
        let session = Session::builder()
            .map_err(backend)?
            .commit_from_file(path)
            .map_err(backend)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "X".to_string());

        tracing::debug!(path = %path.display(), input = %input_name, "onnx session ready");
        Ok(Self {
            session: Mutex::new(session),
            input_name,
            feature_dim,
        })
    }
}

impl OutlierDetector for OnnxDetector {
    fn kind(&self) -> &'static str {
        "onnx"
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<Prediction>, ModelError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let mut flat = Vec::with_capacity(rows.len() * self.feature_dim);
        for row in rows {
            if row.len() != self.feature_dim {
                return Err(ModelError::DimensionMismatch {
                    expected: self.feature_dim,
                    got: row.len(),
                });
            }
            flat.extend(row.iter().map(|v| *v as f32));
        }

        let backend = |e: ort::Error| ModelError::Backend(e.to_string());
        let arr = Array2::from_shape_vec((rows.len(), self.feature_dim), flat)
            .map_err(|e| ModelError::Backend(e.to_string()))?;
        let input = Value::from_array(arr).map_err(backend)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Backend("onnx session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(backend)?;

        let labels = outputs
            .get(LABEL_OUTPUT)
            .ok_or_else(|| ModelError::Backend(format!("missing output {:?}", LABEL_OUTPUT)))?
            .try_extract_tensor::<i64>()
            .map_err(backend)?
            .1
            .to_vec();
        let scores = outputs
            .get(SCORES_OUTPUT)
            .ok_or_else(|| ModelError::Backend(format!("missing output {:?}", SCORES_OUTPUT)))?
            .try_extract_tensor::<f32>()
            .map_err(backend)?
            .1
            .to_vec();

        if labels.len() != rows.len() || scores.len() != rows.len() {
            return Err(ModelError::Backend(format!(
                "expected {} outputs, got {} labels / {} scores",
                rows.len(),
                labels.len(),
                scores.len()
            )));
        }

        Ok(labels
            .into_iter()
            .zip(scores)
            .map(|(label, score)| Prediction {
                score: score as f64,
                is_outlier: label == -1,
            })
            .collect())
    }
}

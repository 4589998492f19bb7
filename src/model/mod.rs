//! Fitted outlier model artifacts and schema-bound inference.
//!
//! An artifact is a JSON manifest holding the ordered [`FeatureSchema`] the
//! model was fitted on and a detector backend. The schema is the only
//! contract between the fitting process and this crate.

mod forest;
mod inference;
#[cfg(feature = "onnx")]
mod onnx;

pub use forest::{IsolationForest, IsolationTree, TreeNode};
pub use inference::{AnomalyLabel, InferenceEngine, ScoredBatch, ScoredRecord};
#[cfg(feature = "onnx")]
pub use onnx::OnnxDetector;

use crate::error::{ModelError, PipelineError, Result, SchemaViolation};
use crate::features::FeatureName;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Ordered feature names a model was fitted on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub features: Vec<String>,
}

/// Output of a detector for one row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Lower is more anomalous
    pub score: f64,
    pub is_outlier: bool,
}

/// A fitted detector. Rows arrive already ordered by the model schema.
pub trait OutlierDetector: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Structural check against the schema width, run once at model construction.
    fn validate(&self, _artifact: &str, _n_features: usize) -> std::result::Result<(), ModelError> {
        Ok(())
    }

    fn predict(&self, rows: &[Vec<f64>]) -> std::result::Result<Vec<Prediction>, ModelError>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    format_version: u32,
    #[serde(default)]
    schema: Option<FeatureSchema>,
    detector: DetectorSpec,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum DetectorSpec {
    IsolationForest(IsolationForest),
    Onnx { path: std::path::PathBuf },
}

/// Read-only fitted model plus its schema; loaded once per run
pub struct ScoringModel {
    name: String,
    schema: FeatureSchema,
    detector: Box<dyn OutlierDetector>,
}

impl std::fmt::Debug for ScoringModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringModel")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("detector", &self.detector.kind())
            .finish()
    }
}

impl ScoringModel {
    /// Build from parts, validating the schema.
    pub fn new(
        name: impl Into<String>,
        schema: Option<FeatureSchema>,
        detector: Box<dyn OutlierDetector>,
    ) -> Result<Self> {
        let name = name.into();
        let schema = validate_schema(&name, schema)?;
        detector.validate(&name, schema.features.len())?;
        Ok(Self {
            name,
            schema,
            detector,
        })
    }

    /// Load a model manifest from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let name = path.display().to_string();
        let manifest: Manifest = serde_json::from_str(&data).map_err(|e| ModelError::InvalidArtifact {
            artifact: name.clone(),
            reason: e.to_string(),
        })?;
        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion(manifest.format_version).into());
        }
        let schema = validate_schema(&name, manifest.schema)?;

        let detector: Box<dyn OutlierDetector> = match manifest.detector {
            DetectorSpec::IsolationForest(forest) => Box::new(forest),
            DetectorSpec::Onnx { path: model_file } => {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                load_onnx(&base.join(model_file), schema.features.len())?
            }
        };
        detector.validate(&name, schema.features.len())?;

        info!(
            artifact = %name,
            detector = detector.kind(),
            schema_version = schema.version,
            features = schema.features.len(),
            "scoring model loaded"
        );
        Ok(Self {
            name,
            schema,
            detector,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn detector(&self) -> &dyn OutlierDetector {
        self.detector.as_ref()
    }
}

fn validate_schema(artifact: &str, schema: Option<FeatureSchema>) -> Result<FeatureSchema> {
    let schema = match schema {
        Some(s) if !s.features.is_empty() => s,
        _ => {
            return Err(SchemaViolation::MissingSchema {
                artifact: artifact.to_string(),
            }
            .into())
        }
    };
    let mut seen = HashSet::new();
    for f in &schema.features {
        // Two names resolving to one feature would feed the same column twice
        let key = FeatureName::resolve(f).map(|n| n.as_str()).unwrap_or(f.as_str());
        if !seen.insert(key) {
            return Err(ModelError::InvalidArtifact {
                artifact: artifact.to_string(),
                reason: format!("duplicate schema feature {:?}", f),
            }
            .into());
        }
    }
    Ok(schema)
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path, feature_dim: usize) -> Result<Box<dyn OutlierDetector>> {
    Ok(Box::new(OnnxDetector::load(path, feature_dim)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path, _feature_dim: usize) -> Result<Box<dyn OutlierDetector>> {
    Err(ModelError::InvalidArtifact {
        artifact: path.display().to_string(),
        reason: "onnx detector requires the `onnx` feature".into(),
    }
    .into())
}

//! Schema-bound inference: select and order live features exactly as the
//! model schema declares, then score.

use super::ScoringModel;
use crate::error::{ModelError, Result, SchemaViolation};
use crate::features::{FeatureBatch, FeatureColumns, FeatureName, FeatureVector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyLabel {
    Normal,
    Anomaly,
}

impl AnomalyLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyLabel::Normal => "Normal",
            AnomalyLabel::Anomaly => "Anomaly",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub features: FeatureVector,
    /// Lower is more anomalous
    pub anomaly_score: f64,
    pub anomaly_label: AnomalyLabel,
}

#[derive(Debug, Clone, Default)]
pub struct ScoredBatch {
    pub batch: String,
    pub columns: FeatureColumns,
    pub records: Vec<ScoredRecord>,
}

impl ScoredBatch {
    pub fn anomaly_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.anomaly_label == AnomalyLabel::Anomaly)
            .count()
    }
}

pub struct InferenceEngine {
    model: ScoringModel,
}

impl InferenceEngine {
    pub fn new(model: ScoringModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &ScoringModel {
        &self.model
    }

    /// Resolve every schema name against the batch's columns, in schema order.
    /// Fails listing exactly the names the batch cannot supply.
    pub fn bind(&self, batch: &str, columns: &FeatureColumns) -> Result<Vec<FeatureName>> {
        let mut bound = Vec::with_capacity(self.model.schema().features.len());
        let mut missing = Vec::new();
        for name in &self.model.schema().features {
            match FeatureName::resolve(name).filter(|f| columns.contains(*f)) {
                Some(f) => bound.push(f),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            warn!(batch, artifact = self.model.name(), ?missing, "schema contract violation");
            return Err(SchemaViolation::MissingFeatures {
                batch: batch.to_string(),
                missing,
            }
            .into());
        }
        Ok(bound)
    }

    pub fn score(&self, input: FeatureBatch) -> Result<ScoredBatch> {
        let bound = self.bind(&input.batch, &input.columns)?;

        let rows: Vec<Vec<f64>> = input
            .vectors
            .iter()
            .map(|v| {
                bound
                    .iter()
                    .map(|f| {
                        v.value(*f).ok_or_else(|| SchemaViolation::MissingFeatures {
                            batch: input.batch.clone(),
                            missing: vec![f.as_str().to_string()],
                        })
                    })
                    .collect::<std::result::Result<Vec<f64>, _>>()
            })
            .collect::<std::result::Result<_, _>>()?;

        let predictions = self.model.detector().predict(&rows)?;
        if predictions.len() != rows.len() {
            return Err(ModelError::Backend(format!(
                "detector returned {} predictions for {} rows",
                predictions.len(),
                rows.len()
            ))
            .into());
        }

        let records: Vec<ScoredRecord> = input
            .vectors
            .into_iter()
            .zip(predictions)
            .map(|(features, p)| ScoredRecord {
                features,
                anomaly_score: p.score,
                anomaly_label: if p.is_outlier {
                    AnomalyLabel::Anomaly
                } else {
                    AnomalyLabel::Normal
                },
            })
            .collect();

        let out = ScoredBatch {
            batch: input.batch,
            columns: input.columns,
            records,
        };
        info!(
            batch = %out.batch,
            records = out.records.len(),
            anomalies = out.anomaly_count(),
            "inference complete"
        );
        Ok(out)
    }
}

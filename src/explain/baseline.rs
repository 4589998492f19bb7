//! Per-feature means over the records labeled Normal in the current batch.

use crate::error::{PipelineError, Result};
use crate::features::{FeatureColumns, FeatureName};
use crate::model::{AnomalyLabel, ScoredRecord};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    /// Number of Normal records the means were taken over
    pub population: usize,
    pub means: BTreeMap<FeatureName, f64>,
}

impl Baseline {
    /// `Ok(None)` for an empty batch. A batch with anomalies but no Normal
    /// records has no baseline and is an error.
    pub fn compute(
        batch: &str,
        columns: &FeatureColumns,
        records: &[ScoredRecord],
    ) -> Result<Option<Self>> {
        if records.is_empty() {
            return Ok(None);
        }
        let normals: Vec<&ScoredRecord> = records
            .iter()
            .filter(|r| r.anomaly_label == AnomalyLabel::Normal)
            .collect();
        if normals.is_empty() {
            return Err(PipelineError::EmptyBaselinePopulation {
                batch: batch.to_string(),
            });
        }

        let n = normals.len() as f64;
        let means = columns
            .iter()
            .map(|f| {
                let sum: f64 = normals.iter().filter_map(|r| r.features.value(f)).sum();
                (f, sum / n)
            })
            .collect();

        Ok(Some(Self {
            population: normals.len(),
            means,
        }))
    }

    pub fn mean(&self, feature: FeatureName) -> Option<f64> {
        self.means.get(&feature).copied()
    }
}

//! Baseline explainability: why was a record flagged?
//!
//! The baseline is learned from the Normal records of the same batch; every
//! Anomaly record is compared against it with an ordered list of
//! [`DeviationCheck`]s.

mod baseline;
mod checks;

pub use baseline::Baseline;
pub use checks::{default_checks, Deviation, DeviationCheck};
pub(crate) use checks::{round2, safe_ratio};

use crate::config::ExplainConfig;
use crate::error::Result;
use crate::features::FeatureColumns;
use crate::model::{AnomalyLabel, ScoredBatch, ScoredRecord};
use rayon::prelude::*;
use tracing::info;

pub const WITHIN_BASELINE: &str = "Traffic behavior within normal baseline";
pub const FALLBACK_REASON: &str = "Multiple feature deviations from learned baseline";
pub const REASON_SEPARATOR: &str = "; ";

#[derive(Debug, Clone, PartialEq)]
pub struct ExplainedRecord {
    pub scored: ScoredRecord,
    pub explanation: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExplainedBatch {
    pub batch: String,
    pub columns: FeatureColumns,
    pub baseline: Option<Baseline>,
    pub records: Vec<ExplainedRecord>,
}

pub struct Explainer {
    checks: Vec<DeviationCheck>,
}

impl Explainer {
    pub fn new(config: &ExplainConfig) -> Self {
        Self {
            checks: default_checks(config),
        }
    }

    pub fn with_checks(checks: Vec<DeviationCheck>) -> Self {
        Self { checks }
    }

    /// Reasons for one anomalous record; never empty.
    pub fn reasons(&self, record: &ScoredRecord, baseline: &Baseline) -> Vec<String> {
        let mut reasons: Vec<String> = self
            .checks
            .iter()
            .filter_map(|c| c.evaluate(&record.features, baseline))
            .collect();
        if reasons.is_empty() {
            reasons.push(FALLBACK_REASON.to_string());
        }
        reasons
    }

    pub fn explain(&self, input: ScoredBatch) -> Result<ExplainedBatch> {
        let baseline = Baseline::compute(&input.batch, &input.columns, &input.records)?;

        let records: Vec<ExplainedRecord> = match &baseline {
            None => Vec::new(),
            Some(base) => input
                .records
                .into_par_iter()
                .map(|scored| {
                    let explanation = match scored.anomaly_label {
                        AnomalyLabel::Normal => WITHIN_BASELINE.to_string(),
                        AnomalyLabel::Anomaly => self.reasons(&scored, base).join(REASON_SEPARATOR),
                    };
                    ExplainedRecord {
                        scored,
                        explanation,
                    }
                })
                .collect(),
        };

        if let Some(base) = &baseline {
            info!(
                batch = %input.batch,
                records = records.len(),
                baseline_population = base.population,
                "explanations generated"
            );
        }
        Ok(ExplainedBatch {
            batch: input.batch,
            columns: input.columns,
            baseline,
            records,
        })
    }
}

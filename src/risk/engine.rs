//! Applies the configured rule set to every explained record of a batch.

use super::{BatchNorms, CompositeRules, DecisionInput, RiskAssessment, RuleSet, Severity, WeightedCapRules};
use crate::config::{RiskConfig, RiskPolicy};
use crate::error::{PipelineError, Result};
use crate::explain::{ExplainedBatch, ExplainedRecord};
use crate::features::FeatureName;
use std::collections::BTreeMap;
use tracing::info;

/// Columns every rule set reads
const SIGNAL_COLUMNS: [FeatureName; 4] = [
    FeatureName::RequestCount,
    FeatureName::ErrorRate,
    FeatureName::AvgResponseTime,
    FeatureName::BurstScore,
];

/// Final decision for one (entity, window)
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub explained: ExplainedRecord,
    pub assessment: RiskAssessment,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionBatch {
    pub batch: String,
    pub rule_set: String,
    pub records: Vec<DecisionRecord>,
}

impl DecisionBatch {
    pub fn severity_counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.records {
            *counts.entry(r.assessment.severity).or_insert(0) += 1;
        }
        counts
    }
}

pub struct RiskEngine {
    rules: Box<dyn RuleSet>,
}

impl RiskEngine {
    pub fn new(config: &RiskConfig) -> Self {
        let rules: Box<dyn RuleSet> = match config.policy {
            RiskPolicy::Composite => Box::new(CompositeRules::new(config.composite)),
            RiskPolicy::WeightedCap => Box::new(WeightedCapRules::new(config.weighted_cap)),
        };
        Self { rules }
    }

    pub fn with_rules(rules: Box<dyn RuleSet>) -> Self {
        Self { rules }
    }

    pub fn rule_set(&self) -> &dyn RuleSet {
        self.rules.as_ref()
    }

    pub fn norms(batch: &ExplainedBatch) -> BatchNorms {
        batch.records.iter().fold(BatchNorms::default(), |acc, r| {
            let f = &r.scored.features;
            BatchNorms {
                max_request_count: acc.max_request_count.max(f.request_count as f64),
                max_avg_response_time: acc.max_avg_response_time.max(f.avg_response_time),
            }
        })
    }

    pub fn assess(&self, input: ExplainedBatch) -> Result<DecisionBatch> {
        let missing: Vec<String> = SIGNAL_COLUMNS
            .iter()
            .filter(|f| !input.columns.contains(**f))
            .map(|f| f.as_str().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingColumns {
                dataset: input.batch,
                missing,
            });
        }

        let norms = Self::norms(&input);
        let records: Vec<DecisionRecord> = input
            .records
            .into_iter()
            .map(|explained| {
                let f = &explained.scored.features;
                let assessment = self.rules.assess(&DecisionInput {
                    request_count: f.request_count as f64,
                    error_rate: f.error_rate,
                    avg_response_time: f.avg_response_time,
                    burst_score: f.burst_score,
                    label: explained.scored.anomaly_label,
                    explanation: &explained.explanation,
                    norms: &norms,
                });
                DecisionRecord {
                    explained,
                    assessment,
                }
            })
            .collect();

        let out = DecisionBatch {
            batch: input.batch,
            rule_set: self.rules.id().to_string(),
            records,
        };
        let counts = out.severity_counts();
        info!(
            batch = %out.batch,
            rule_set = %out.rule_set,
            high = counts.get(&Severity::High).copied().unwrap_or(0),
            medium = counts.get(&Severity::Medium).copied().unwrap_or(0),
            low = counts.get(&Severity::Low).copied().unwrap_or(0),
            "risk assessed"
        );
        Ok(out)
    }
}

//! Risk scoring and mitigation decisions.

mod engine;
mod rules;

pub use engine::{DecisionBatch, DecisionRecord, RiskEngine};
pub use rules::{CompositeRules, DecisionInput, RuleSet, WeightedCapRules};

use crate::config::SeverityThresholds;
use serde::{Deserialize, Serialize};

/// Ordered Low < Medium < High
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_score(score: f64, thresholds: &SeverityThresholds) -> Self {
        if score >= thresholds.high_threshold {
            Severity::High
        } else if score >= thresholds.medium_threshold {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub severity: Severity,
    pub recommended_action: String,
    pub rule_set: String,
}

/// Batch-scoped normalization maxima, computed once over the whole batch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchNorms {
    pub max_request_count: f64,
    pub max_avg_response_time: f64,
}

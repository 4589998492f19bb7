//! Versioned rule sets: pure functions from a record's signals to a risk
//! assessment. One rule set governs a whole run.

use super::{BatchNorms, RiskAssessment, Severity};
use crate::config::SeverityThresholds;
use crate::explain::{round2, safe_ratio};
use crate::model::AnomalyLabel;

/// Everything a rule set may look at for one record
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub request_count: f64,
    pub error_rate: f64,
    pub avg_response_time: f64,
    pub burst_score: f64,
    pub label: AnomalyLabel,
    pub explanation: &'a str,
    pub norms: &'a BatchNorms,
}

pub trait RuleSet: Send + Sync {
    /// Versioned identifier recorded with every assessment, e.g. `composite/v1`
    fn id(&self) -> &'static str;

    fn thresholds(&self) -> SeverityThresholds;

    fn risk_score(&self, input: &DecisionInput<'_>) -> f64;

    fn action(&self, severity: Severity, input: &DecisionInput<'_>) -> String;

    fn severity(&self, score: f64) -> Severity {
        Severity::from_score(score, &self.thresholds())
    }

    fn assess(&self, input: &DecisionInput<'_>) -> RiskAssessment {
        let risk_score = self.risk_score(input);
        let severity = self.severity(risk_score);
        RiskAssessment {
            risk_score,
            severity,
            recommended_action: self.action(severity, input),
            rule_set: self.id().to_string(),
        }
    }
}

/// Normalized blend of rate, errors and latency; nominally 0–10, not clamped.
pub struct CompositeRules {
    thresholds: SeverityThresholds,
}

impl CompositeRules {
    pub const ID: &'static str = "composite/v1";

    pub fn new(thresholds: SeverityThresholds) -> Self {
        Self { thresholds }
    }
}

impl RuleSet for CompositeRules {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn thresholds(&self) -> SeverityThresholds {
        self.thresholds
    }

    fn risk_score(&self, input: &DecisionInput<'_>) -> f64 {
        let rate = safe_ratio(input.request_count, input.norms.max_request_count);
        let latency = safe_ratio(input.avg_response_time, input.norms.max_avg_response_time);
        round2(rate * 4.0 + input.error_rate * 4.0 + latency * 2.0)
    }

    fn action(&self, severity: Severity, _input: &DecisionInput<'_>) -> String {
        match severity {
            Severity::High => "Block IP and alert SOC immediately",
            Severity::Medium => "Apply rate limiting and monitor closely",
            Severity::Low => "Allow traffic and continue monitoring",
        }
        .to_string()
    }
}

/// Capped additive score on a 0–100 scale; action picked from explanation keywords.
pub struct WeightedCapRules {
    thresholds: SeverityThresholds,
}

impl WeightedCapRules {
    pub const ID: &'static str = "weighted-cap/v1";

    /// Keyword (lower case) → action, first match wins
    pub const KEYWORD_ACTIONS: [(&'static str, &'static str); 3] = [
        ("high request rate", "Rate limit IP for 5 minutes"),
        ("error rate", "Temporarily block IP"),
        ("payload", "Inspect payload and block if repeated"),
    ];
    pub const DEFAULT_ACTION: &'static str = "Monitor traffic closely";
    pub const NORMAL_ACTION: &'static str = "No action required";

    pub fn new(thresholds: SeverityThresholds) -> Self {
        Self { thresholds }
    }
}

impl RuleSet for WeightedCapRules {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn thresholds(&self) -> SeverityThresholds {
        self.thresholds
    }

    fn risk_score(&self, input: &DecisionInput<'_>) -> f64 {
        let score = (input.request_count * 0.5).min(30.0)
            + input.error_rate * 40.0
            + input.burst_score * 30.0;
        score.trunc().clamp(0.0, 100.0)
    }

    fn action(&self, _severity: Severity, input: &DecisionInput<'_>) -> String {
        if input.label != AnomalyLabel::Anomaly {
            return Self::NORMAL_ACTION.to_string();
        }
        let text = input.explanation.to_lowercase();
        Self::KEYWORD_ACTIONS
            .iter()
            .find(|(kw, _)| text.contains(kw))
            .map(|(_, action)| *action)
            .unwrap_or(Self::DEFAULT_ACTION)
            .to_string()
    }
}

//! Ordered deviation checks. Each yields at most one reason for a record.

use super::Baseline;
use crate::config::ExplainConfig;
use crate::features::{FeatureName, FeatureVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deviation {
    RateExceeded,
    ElevatedErrors,
    Latency,
    OversizedPayload,
    EndpointScan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviationCheck {
    pub feature: FeatureName,
    pub multiplier: f64,
    pub deviation: Deviation,
}

impl DeviationCheck {
    /// Fires when `value > multiplier × baseline`. Skipped when either side is absent.
    pub fn evaluate(&self, record: &FeatureVector, baseline: &Baseline) -> Option<String> {
        let value = record.value(self.feature)?;
        let base = baseline.mean(self.feature)?;
        if value > base * self.multiplier {
            Some(self.describe(value, base))
        } else {
            None
        }
    }

    fn describe(&self, value: f64, base: f64) -> String {
        match self.deviation {
            Deviation::RateExceeded => format!(
                "Unusually high request rate: exceeded baseline by {:.2}×",
                round2(safe_ratio(value, base))
            ),
            Deviation::ElevatedErrors => "Unusually high error rate observed".to_string(),
            Deviation::Latency => "Response time significantly higher than baseline".to_string(),
            Deviation::OversizedPayload => "Abnormally large request payloads".to_string(),
            Deviation::EndpointScan => "Accessing unusually high number of endpoints".to_string(),
        }
    }
}

/// Checks in evaluation order
pub fn default_checks(config: &ExplainConfig) -> Vec<DeviationCheck> {
    vec![
        DeviationCheck {
            feature: FeatureName::RequestCount,
            multiplier: config.rate_multiplier,
            deviation: Deviation::RateExceeded,
        },
        DeviationCheck {
            feature: FeatureName::ErrorRate,
            multiplier: config.error_multiplier,
            deviation: Deviation::ElevatedErrors,
        },
        DeviationCheck {
            feature: FeatureName::AvgResponseTime,
            multiplier: config.latency_multiplier,
            deviation: Deviation::Latency,
        },
        DeviationCheck {
            feature: FeatureName::AvgRequestSize,
            multiplier: config.payload_multiplier,
            deviation: Deviation::OversizedPayload,
        },
        DeviationCheck {
            feature: FeatureName::UniqueEndpointCount,
            multiplier: config.endpoint_multiplier,
            deviation: Deviation::EndpointScan,
        },
    ]
}

/// Zero when the denominator is zero
pub(crate) fn safe_ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

//! Per-entity behavioral features, one vector per (entity, time window).

mod behavioral;
mod pipeline;

pub use behavioral::WindowStats;
pub use pipeline::{window_start, FeatureAggregator};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The closed set of numeric features a model schema may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    RequestCount,
    AvgResponseTime,
    ErrorRate,
    AvgRequestSize,
    UniqueEndpointCount,
    BurstScore,
}

impl FeatureName {
    pub const ALL: [FeatureName; 6] = [
        FeatureName::RequestCount,
        FeatureName::AvgResponseTime,
        FeatureName::ErrorRate,
        FeatureName::AvgRequestSize,
        FeatureName::UniqueEndpointCount,
        FeatureName::BurstScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::RequestCount => "request_count",
            FeatureName::AvgResponseTime => "avg_response_time",
            FeatureName::ErrorRate => "error_rate",
            FeatureName::AvgRequestSize => "avg_request_size",
            FeatureName::UniqueEndpointCount => "unique_endpoint_count",
            FeatureName::BurstScore => "burst_score",
        }
    }

    /// Column name used by datasets and models produced by the older tooling
    pub fn legacy_name(&self) -> Option<&'static str> {
        match self {
            FeatureName::RequestCount => Some("req_per_min"),
            FeatureName::AvgResponseTime => Some("avg_resp_time"),
            FeatureName::AvgRequestSize => Some("avg_req_size"),
            FeatureName::UniqueEndpointCount => Some("unique_endpoints"),
            FeatureName::ErrorRate | FeatureName::BurstScore => None,
        }
    }

    /// Resolve a column or schema name (canonical or legacy)
    pub fn resolve(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == name || f.legacy_name() == Some(name))
    }

    /// Columns a feature dataset may omit entirely
    pub fn is_optional(&self) -> bool {
        matches!(self, FeatureName::AvgRequestSize | FeatureName::UniqueEndpointCount)
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavioral summary of one entity within one time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub entity_id: String,
    pub window_start: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub avg_response_time: f64,
    /// Fraction of requests with status >= 400
    pub error_rate: f64,
    pub avg_request_size: Option<f64>,
    pub unique_endpoint_count: Option<u64>,
    /// request_count / max request_count of the batch
    pub burst_score: f64,
}

impl FeatureVector {
    pub fn value(&self, name: FeatureName) -> Option<f64> {
        match name {
            FeatureName::RequestCount => Some(self.request_count as f64),
            FeatureName::AvgResponseTime => Some(self.avg_response_time),
            FeatureName::ErrorRate => Some(self.error_rate),
            FeatureName::AvgRequestSize => self.avg_request_size,
            FeatureName::UniqueEndpointCount => self.unique_endpoint_count.map(|n| n as f64),
            FeatureName::BurstScore => Some(self.burst_score),
        }
    }
}

/// Feature columns present in a batch. Optional columns are either present
/// for every record of the batch or for none.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureColumns(BTreeSet<FeatureName>);

impl FeatureColumns {
    pub fn all() -> Self {
        Self(FeatureName::ALL.into_iter().collect())
    }

    pub fn contains(&self, name: FeatureName) -> bool {
        self.0.contains(&name)
    }

    pub fn remove(&mut self, name: FeatureName) {
        self.0.remove(&name);
    }

    pub fn iter(&self) -> impl Iterator<Item = FeatureName> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<FeatureName> for FeatureColumns {
    fn from_iter<I: IntoIterator<Item = FeatureName>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Output of the aggregation stage
#[derive(Debug, Clone, Default)]
pub struct FeatureBatch {
    pub batch: String,
    pub columns: FeatureColumns,
    pub vectors: Vec<FeatureVector>,
}

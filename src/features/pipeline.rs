//! Aggregation pipeline: events → (entity, window) groups → window stats → vectors.

use super::{FeatureBatch, FeatureColumns, FeatureVector, WindowStats};
use crate::config::FeaturesConfig;
use crate::events::RawEvent;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::info;

/// Floor a timestamp to the start of its window.
pub fn window_start(ts: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    let w = window_secs.max(1) as i64;
    let floored = ts.timestamp().div_euclid(w) * w;
    DateTime::from_timestamp(floored, 0).unwrap_or(ts)
}

pub struct FeatureAggregator {
    config: FeaturesConfig,
}

impl FeatureAggregator {
    pub fn new(config: FeaturesConfig) -> Self {
        Self { config }
    }

    /// One vector per (entity, window), ordered by entity then window.
    pub fn aggregate(&self, batch: &str, events: &[RawEvent]) -> FeatureBatch {
        let mut groups: BTreeMap<(&str, DateTime<Utc>), Vec<&RawEvent>> = BTreeMap::new();
        for e in events {
            let key = (e.entity_id.as_str(), window_start(e.timestamp, self.config.window_secs));
            groups.entry(key).or_default().push(e);
        }

        let grouped: Vec<((&str, DateTime<Utc>), Vec<&RawEvent>)> = groups.into_iter().collect();
        let stats: Vec<(&str, DateTime<Utc>, WindowStats)> = grouped
            .par_iter()
            .map(|((entity, window), evs)| (*entity, *window, WindowStats::from_events(evs)))
            .collect();

        // Burst normalization needs the whole batch
        let max_count = stats.iter().map(|(_, _, s)| s.request_count).max().unwrap_or(0);

        let vectors: Vec<FeatureVector> = stats
            .into_iter()
            .map(|(entity, window, s)| FeatureVector {
                entity_id: entity.to_string(),
                window_start: Some(window),
                burst_score: burst_score(s.request_count, max_count),
                request_count: s.request_count,
                avg_response_time: s.avg_response_time,
                error_rate: s.error_rate,
                avg_request_size: Some(s.avg_request_size),
                unique_endpoint_count: Some(s.unique_endpoint_count),
            })
            .collect();

        info!(
            batch,
            events = events.len(),
            vectors = vectors.len(),
            max_request_count = max_count,
            "features aggregated"
        );

        FeatureBatch {
            batch: batch.to_string(),
            columns: FeatureColumns::all(),
            vectors,
        }
    }
}

fn burst_score(count: u64, max_count: u64) -> f64 {
    if max_count == 0 {
        0.0
    } else {
        count as f64 / max_count as f64
    }
}

//! Behavioral statistics over the events of one entity window.

use crate::events::RawEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub request_count: u64,
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub avg_request_size: f64,
    pub unique_endpoint_count: u64,
}

impl WindowStats {
    pub fn from_events(events: &[&RawEvent]) -> Self {
        if events.is_empty() {
            return Self::default();
        }
        let n = events.len() as f64;
        let mut errors = 0u64;
        let mut resp_total = 0.0;
        let mut size_total = 0.0;
        let mut endpoints = HashSet::new();

        for e in events {
            if e.is_error() {
                errors += 1;
            }
            resp_total += e.response_time;
            size_total += e.request_size;
            endpoints.insert(e.endpoint.as_str());
        }

        Self {
            request_count: events.len() as u64,
            avg_response_time: resp_total / n,
            error_rate: errors as f64 / n,
            avg_request_size: size_total / n,
            unique_endpoint_count: endpoints.len() as u64,
        }
    }
}

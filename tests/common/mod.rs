//! Shared fixtures: a tiny fitted forest and scenario traffic.

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use traffic_guard::config::PipelineConfig;
use traffic_guard::events::{EventLog, RawEvent};

pub const ALL_FEATURES: [&str; 6] = [
    "request_count",
    "avg_response_time",
    "error_rate",
    "avg_request_size",
    "unique_endpoint_count",
    "burst_score",
];

/// Single-split forest: records with `schema[feature] > threshold` are isolated.
pub fn stump_manifest(features: &[&str], feature: usize, threshold: f64) -> serde_json::Value {
    json!({
        "format_version": 1,
        "schema": { "version": 3, "features": features },
        "detector": {
            "kind": "isolation_forest",
            "max_samples": 256,
            "offset": -0.5,
            "trees": [{
                "nodes": [
                    { "split": { "feature": feature, "threshold": threshold, "left": 1, "right": 2 } },
                    { "leaf": { "samples": 255 } },
                    { "leaf": { "samples": 1 } }
                ]
            }]
        }
    })
}

/// Error-rate model over every feature: error_rate > 0.5 is an outlier.
pub fn error_rate_manifest() -> serde_json::Value {
    stump_manifest(&ALL_FEATURES, 2, 0.5)
}

pub fn write_manifest(dir: &Path, manifest: &serde_json::Value) -> PathBuf {
    let path = dir.join("model.json");
    std::fs::write(&path, serde_json::to_vec_pretty(manifest).unwrap()).unwrap();
    path
}

pub fn config_in(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        data_dir: dir.join("processed"),
        events_path: dir.join("traffic_logs.csv"),
        model_path: dir.join("model.json"),
        ..PipelineConfig::default()
    }
}

fn event(entity: &str, second: i64, endpoint: &str, status: u16, size: f64, resp: f64, sig: &str) -> RawEvent {
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    RawEvent {
        timestamp: base + Duration::seconds(second),
        entity_id: entity.to_string(),
        endpoint: endpoint.to_string(),
        method: if status >= 400 { "POST" } else { "GET" }.to_string(),
        status_code: status,
        request_size: size,
        response_time: resp,
        client_signature: sig.to_string(),
    }
}

/// 40 requests from a normal client (one error), and a 30-request burst
/// with 27 auth failures, all inside the same minute.
pub fn burst_scenario() -> Vec<RawEvent> {
    let endpoints = ["/", "/login", "/api/data", "/api/login"];
    let mut events = Vec::new();
    for i in 0..40 {
        let status = if i == 7 { 500 } else { 200 };
        events.push(event("10.0.0.1", i, endpoints[i as usize % 4], status, 500.0, 150.0, "Mozilla/5.0"));
    }
    let attack = ["/login", "/api/login", "/admin"];
    for i in 0..30 {
        let status = if i < 27 { 401 } else { 200 };
        events.push(event("10.0.0.99", i * 2, attack[i as usize % 3], status, 1500.0, 500.0, "bot-agent"));
    }
    events
}

pub fn scenario_log() -> EventLog {
    EventLog {
        batch: "scenario".to_string(),
        events: burst_scenario(),
        skipped_rows: 0,
    }
}

/// Scenario as a CSV event log in the original column layout, plus one bad row.
pub fn write_scenario_csv(path: &Path) {
    let mut wtr = csv::Writer::from_path(path).unwrap();
    wtr.write_record([
        "timestamp", "ip", "endpoint", "method", "status", "req_size", "resp_time", "user_agent",
    ])
    .unwrap();
    for e in burst_scenario() {
        wtr.write_record([
            e.timestamp.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            e.entity_id,
            e.endpoint,
            e.method,
            e.status_code.to_string(),
            e.request_size.to_string(),
            e.response_time.to_string(),
            e.client_signature,
        ])
        .unwrap();
    }
    wtr.write_record(["garbage", "10.0.0.5", "/", "GET", "200", "1", "1", "x"]).unwrap();
    wtr.flush().unwrap();
}

//! End-to-end pipeline behavior over the burst scenario.

mod common;

use chrono::{Duration, TimeZone, Utc};
use traffic_guard::{
    config::{FeaturesConfig, RiskPolicy},
    error::{PipelineError, SchemaViolation},
    events::EventLog,
    explain::{Explainer, FALLBACK_REASON, WITHIN_BASELINE},
    features::{window_start, FeatureAggregator, FeatureName},
    model::AnomalyLabel,
    pipeline::{self, Pipeline, RunManifest},
    risk::Severity,
    storage::datasets::{self, DECISIONS_FILE, EXPLAINED_FILE, FEATURES_FILE, SCORED_FILE},
};

fn scenario_pipeline(dir: &std::path::Path) -> Pipeline {
    common::write_manifest(dir, &common::error_rate_manifest());
    Pipeline::from_config(common::config_in(dir)).unwrap()
}

#[test]
fn aggregation_per_entity_window() {
    let batch = FeatureAggregator::new(FeaturesConfig::default()).aggregate("s", &common::burst_scenario());
    assert_eq!(batch.vectors.len(), 2);

    let normal = &batch.vectors[0];
    assert_eq!(normal.entity_id, "10.0.0.1");
    assert_eq!(normal.request_count, 40);
    assert_eq!(normal.error_rate, 0.025);
    assert_eq!(normal.avg_response_time, 150.0);
    assert_eq!(normal.avg_request_size, Some(500.0));
    assert_eq!(normal.unique_endpoint_count, Some(4));
    assert_eq!(normal.burst_score, 1.0);

    let burst = &batch.vectors[1];
    assert_eq!(burst.entity_id, "10.0.0.99");
    assert_eq!(burst.request_count, 30);
    assert_eq!(burst.error_rate, 0.9);
    assert_eq!(burst.unique_endpoint_count, Some(3));
    assert_eq!(burst.burst_score, 0.75);
}

#[test]
fn windows_split_entities() {
    let mut events = common::burst_scenario();
    // Same entity, next minute
    let mut late = events[0].clone();
    late.timestamp = late.timestamp + Duration::seconds(90);
    events.push(late);

    let batch = FeatureAggregator::new(FeaturesConfig::default()).aggregate("s", &events);
    assert_eq!(batch.vectors.len(), 3);
    assert_eq!(batch.vectors[0].entity_id, "10.0.0.1");
    assert_eq!(batch.vectors[1].entity_id, "10.0.0.1");
    assert!(batch.vectors[0].window_start < batch.vectors[1].window_start);
    assert_eq!(batch.vectors[1].request_count, 1);
    assert_eq!(batch.vectors[1].burst_score, 1.0 / 40.0);

    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 4, 59).unwrap();
    assert_eq!(window_start(ts, 300), Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
}

#[test]
fn empty_batch_yields_empty_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = scenario_pipeline(dir.path());
    let report = pipeline
        .run_log(EventLog {
            batch: "empty".into(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(report.manifest.vectors, 0);
    assert!(report.decisions.records.is_empty());
    assert!(dir.path().join("processed").join(DECISIONS_FILE).exists());
}

#[test]
fn scenario_composite() {
    let dir = tempfile::tempdir().unwrap();
    let report = scenario_pipeline(dir.path()).run_log(common::scenario_log()).unwrap();
    let records = &report.decisions.records;
    assert_eq!(records.len(), 2);
    assert_eq!(report.decisions.rule_set, "composite/v1");

    let normal = &records[0];
    assert_eq!(normal.explained.scored.anomaly_label, AnomalyLabel::Normal);
    assert_eq!(normal.explained.explanation, WITHIN_BASELINE);
    assert_eq!(normal.assessment.risk_score, 4.7);
    assert_eq!(normal.assessment.severity, Severity::Medium);

    let burst = &records[1];
    assert_eq!(burst.explained.scored.features.entity_id, "10.0.0.99");
    assert_eq!(burst.explained.scored.anomaly_label, AnomalyLabel::Anomaly);
    assert!(burst.explained.scored.anomaly_score < normal.explained.scored.anomaly_score);
    assert_eq!(
        burst.explained.explanation,
        "Unusually high error rate observed; Response time significantly higher than baseline; \
         Abnormally large request payloads"
    );
    assert_eq!(burst.assessment.risk_score, 8.6);
    assert_eq!(burst.assessment.severity, Severity::High);
    assert_eq!(burst.assessment.recommended_action, "Block IP and alert SOC immediately");
    assert!(records.iter().all(|r| r.assessment.rule_set == "composite/v1"));

    assert_eq!(report.manifest.anomalies, 1);
    assert_eq!(report.manifest.severity.get(&Severity::High), Some(&1));
    assert_eq!(report.manifest.datasets.len(), 4);
}

#[test]
fn scenario_weighted_cap() {
    let dir = tempfile::tempdir().unwrap();
    common::write_manifest(dir.path(), &common::error_rate_manifest());
    let mut config = common::config_in(dir.path());
    config.risk.policy = RiskPolicy::WeightedCap;
    let report = Pipeline::from_config(config).unwrap().run_log(common::scenario_log()).unwrap();

    let records = &report.decisions.records;
    assert_eq!(report.decisions.rule_set, "weighted-cap/v1");
    assert_eq!(records[0].assessment.risk_score, 51.0);
    assert_eq!(records[0].assessment.severity, Severity::Medium);
    assert_eq!(records[0].assessment.recommended_action, "No action required");
    assert_eq!(records[1].assessment.risk_score, 73.0);
    assert_eq!(records[1].assessment.severity, Severity::High);
    assert_eq!(records[1].assessment.recommended_action, "Temporarily block IP");
}

#[test]
fn rerun_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = scenario_pipeline(dir.path());
    common::write_scenario_csv(&pipeline.config().events_path);

    let first = pipeline.run().unwrap();
    let out = pipeline.dataset_path(DECISIONS_FILE);
    let first_bytes = std::fs::read(&out).unwrap();
    let second = pipeline.run().unwrap();
    let second_bytes = std::fs::read(&out).unwrap();

    assert_eq!(first_bytes, second_bytes);
    assert_ne!(first.manifest.run_id, second.manifest.run_id);
    for name in [FEATURES_FILE, SCORED_FILE, EXPLAINED_FILE, DECISIONS_FILE] {
        assert_eq!(first.manifest.digest(name), second.manifest.digest(name), "{}", name);
    }
    assert_eq!(second.manifest.events, 70);
    assert_eq!(second.manifest.skipped_rows, 1);

    let stored = RunManifest::load(&pipeline.config().data_dir).unwrap();
    assert_eq!(stored.run_id, second.manifest.run_id);
}

#[test]
fn stages_match_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = scenario_pipeline(dir.path());
    let config = pipeline.config().clone();
    common::write_scenario_csv(&config.events_path);
    pipeline.run().unwrap();
    let full = std::fs::read(pipeline.dataset_path(DECISIONS_FILE)).unwrap();

    let staged = dir.path().join("staged");
    let (f, s, e, d) = (
        staged.join(FEATURES_FILE),
        staged.join(SCORED_FILE),
        staged.join(EXPLAINED_FILE),
        staged.join(DECISIONS_FILE),
    );
    pipeline::features_stage(&config, &config.events_path, &f).unwrap();
    pipeline.detect_stage(&f, &s, "traffic_logs").unwrap();
    pipeline::explain_stage(&config, &s, &e, "traffic_logs").unwrap();
    let digest = pipeline::decide_stage(&config, &e, &d, "traffic_logs").unwrap();

    assert_eq!(digest.rows, 2);
    assert_eq!(std::fs::read(&d).unwrap(), full);
}

#[test]
fn missing_schema_features_are_named() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = common::stump_manifest(&["request_count", "avg_request_size", "error_rate", "geo_risk"], 2, 0.5);
    common::write_manifest(dir.path(), &manifest);
    let pipeline = Pipeline::from_config(common::config_in(dir.path())).unwrap();

    let input = dir.path().join("features.csv");
    std::fs::write(
        &input,
        "entity_id,request_count,avg_response_time,error_rate,burst_score\n\
         10.0.0.1,40,150,0.025,1\n\
         10.0.0.99,30,500,0.9,0.75\n",
    )
    .unwrap();
    let out = dir.path().join("scored.csv");

    match pipeline.detect_stage(&input, &out, "live") {
        Err(PipelineError::SchemaContract(SchemaViolation::MissingFeatures { batch, missing })) => {
            assert_eq!(batch, "live");
            assert_eq!(missing, vec!["avg_request_size".to_string(), "geo_risk".to_string()]);
        }
        other => panic!("expected schema violation, got {:?}", other.map(|d| d.rows)),
    }
    assert!(!out.exists());
}

#[test]
fn superset_and_legacy_columns_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = common::stump_manifest(&["req_per_min", "avg_resp_time", "error_rate"], 2, 0.5);
    common::write_manifest(dir.path(), &manifest);
    let config = common::config_in(dir.path());
    let pipeline = Pipeline::from_config(config.clone()).unwrap();

    let input = dir.path().join("features.csv");
    std::fs::write(
        &input,
        "ip,req_per_min,avg_resp_time,error_rate,avg_req_size,unique_endpoints,burst_score,geo\n\
         10.0.0.1,40,150,0.025,500,4,1,NL\n\
         10.0.0.99,30,500,0.9,1500,3,0.75,US\n",
    )
    .unwrap();
    let scored = dir.path().join("scored.csv");
    assert_eq!(pipeline.detect_stage(&input, &scored, "legacy").unwrap().rows, 2);

    let explained = dir.path().join("explained.csv");
    pipeline::explain_stage(&config, &scored, &explained, "legacy").unwrap();
    let (batch, skipped) = datasets::read_explained(&explained, "legacy").unwrap();
    assert_eq!(skipped, 0);
    assert_eq!(batch.records[1].scored.anomaly_label, AnomalyLabel::Anomaly);
    assert!(batch.records[1].explanation.contains("Abnormally large request payloads"));
}

#[test]
fn optional_columns_absent_skip_their_checks() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = common::stump_manifest(&["request_count", "error_rate"], 1, 0.5);
    common::write_manifest(dir.path(), &manifest);
    let config = common::config_in(dir.path());
    let pipeline = Pipeline::from_config(config.clone()).unwrap();

    let input = dir.path().join("features.csv");
    std::fs::write(
        &input,
        "entity_id,request_count,avg_response_time,error_rate,burst_score\n\
         a,10,100,0.0,1\n\
         b,10,100,0.9,1\n",
    )
    .unwrap();
    let (features, _) = datasets::read_features(&input, "thin").unwrap();
    assert!(!features.columns.contains(FeatureName::AvgRequestSize));
    assert!(!features.columns.contains(FeatureName::UniqueEndpointCount));

    let scored = pipeline.detect(features).unwrap();
    let explained = Explainer::new(&config.explain).explain(scored).unwrap();
    assert_eq!(explained.records[1].explanation, "Unusually high error rate observed");
}

#[test]
fn anomaly_without_deviation_gets_fallback_reason() {
    let dir = tempfile::tempdir().unwrap();
    // Isolates on request_count alone; the outlier does not exceed any multiplier
    let manifest = common::stump_manifest(&common::ALL_FEATURES, 0, 35.0);
    common::write_manifest(dir.path(), &manifest);
    let pipeline = Pipeline::from_config(common::config_in(dir.path())).unwrap();

    let mut events = common::burst_scenario();
    events.retain(|e| e.entity_id == "10.0.0.1");
    let mut quiet = events.clone();
    for e in &mut quiet {
        e.entity_id = "10.0.0.2".into();
    }
    quiet.truncate(30);
    events.extend(quiet);

    let report = pipeline
        .run_log(EventLog {
            batch: "fallback".into(),
            events,
            skipped_rows: 0,
        })
        .unwrap();
    let outlier = &report.decisions.records[0];
    assert_eq!(outlier.explained.scored.features.entity_id, "10.0.0.1");
    assert_eq!(outlier.explained.scored.anomaly_label, AnomalyLabel::Anomaly);
    assert_eq!(outlier.explained.explanation, FALLBACK_REASON);
}

#[test]
fn all_anomalous_batch_has_no_baseline() {
    let dir = tempfile::tempdir().unwrap();
    common::write_manifest(dir.path(), &common::stump_manifest(&common::ALL_FEATURES, 2, -1.0));
    let pipeline = Pipeline::from_config(common::config_in(dir.path())).unwrap();

    let err = pipeline.run_log(common::scenario_log()).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyBaselinePopulation { ref batch } if batch == "scenario"));
    assert!(!pipeline.dataset_path(DECISIONS_FILE).exists());
}

#[test]
fn explanations_follow_labels() {
    let dir = tempfile::tempdir().unwrap();
    let report = scenario_pipeline(dir.path()).run_log(common::scenario_log()).unwrap();
    for r in &report.decisions.records {
        match r.explained.scored.anomaly_label {
            AnomalyLabel::Normal => assert_eq!(r.explained.explanation, WITHIN_BASELINE),
            AnomalyLabel::Anomaly => {
                assert!(!r.explained.explanation.is_empty());
                assert_ne!(r.explained.explanation, WITHIN_BASELINE);
            }
        }
    }
}

#[test]
fn severity_is_monotonic_in_score() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = scenario_pipeline(dir.path());
    let mut events = common::burst_scenario();
    // More entities with varying error counts widen the score range
    for (n, entity) in ["10.0.1.1", "10.0.1.2", "10.0.1.3"].iter().enumerate() {
        for i in 0..20 {
            let mut e = events[i].clone();
            e.entity_id = entity.to_string();
            if i < n * 3 {
                e.status_code = 503;
            }
            events.push(e);
        }
    }
    let report = pipeline
        .run_log(EventLog {
            batch: "mono".into(),
            events,
            skipped_rows: 0,
        })
        .unwrap();

    let mut pairs: Vec<(f64, Severity)> = report
        .decisions
        .records
        .iter()
        .map(|r| (r.assessment.risk_score, r.assessment.severity))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    for w in pairs.windows(2) {
        assert!(w[0].1 <= w[1].1, "{:?} then {:?}", w[0], w[1]);
    }
}

#[test]
fn non_finite_and_out_of_range_rows_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = common::stump_manifest(&["request_count", "error_rate"], 1, 0.5);
    common::write_manifest(dir.path(), &manifest);
    let config = common::config_in(dir.path());
    let pipeline = Pipeline::from_config(config.clone()).unwrap();

    let input = dir.path().join("features.csv");
    std::fs::write(
        &input,
        "entity_id,request_count,avg_response_time,error_rate,burst_score\n\
         a,10,100,0.0,1\n\
         b,10,100,0.9,1\n\
         n,10,NaN,0.0,1\n\
         i,10,inf,0.0,1\n\
         e,10,100,1.5,1\n",
    )
    .unwrap();
    let (features, skipped) = datasets::read_features(&input, "dirty").unwrap();
    assert_eq!(skipped, 3);
    let ids: Vec<&str> = features.vectors.iter().map(|v| v.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let scored = pipeline.detect(features).unwrap();
    let explained = Explainer::new(&config.explain).explain(scored).unwrap();
    assert_eq!(explained.baseline.as_ref().unwrap().mean(FeatureName::AvgResponseTime), Some(100.0));
    let decisions = pipeline.decide(explained).unwrap();
    assert!(decisions.records.iter().all(|r| r.assessment.risk_score.is_finite()));
    assert_eq!(decisions.records[1].assessment.risk_score, 9.6);
}

#[test]
fn staged_empty_log_matches_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = scenario_pipeline(dir.path());
    let config = pipeline.config().clone();
    std::fs::write(
        &config.events_path,
        "timestamp,entity_id,endpoint,method,status_code,request_size,response_time,client_signature\n",
    )
    .unwrap();
    let report = pipeline.run().unwrap();
    assert_eq!(report.manifest.vectors, 0);
    let full = std::fs::read(pipeline.dataset_path(DECISIONS_FILE)).unwrap();
    assert!(full.starts_with(b"entity_id,window_start,request_count,"));

    let staged = dir.path().join("staged");
    let (f, s, e, d) = (
        staged.join(FEATURES_FILE),
        staged.join(SCORED_FILE),
        staged.join(EXPLAINED_FILE),
        staged.join(DECISIONS_FILE),
    );
    pipeline::features_stage(&config, &config.events_path, &f).unwrap();
    let (features, _) = datasets::read_features(&f, "empty").unwrap();
    assert!(features.columns.contains(FeatureName::AvgRequestSize));
    assert!(features.columns.contains(FeatureName::UniqueEndpointCount));

    assert_eq!(pipeline.detect_stage(&f, &s, "empty").unwrap().rows, 0);
    pipeline::explain_stage(&config, &s, &e, "empty").unwrap();
    assert_eq!(pipeline::decide_stage(&config, &e, &d, "empty").unwrap().rows, 0);
    assert_eq!(std::fs::read(&d).unwrap(), full);
}

#[test]
fn store_failure_keeps_previous_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = scenario_pipeline(dir.path());
    pipeline.run_log(common::scenario_log()).unwrap();
    let out = pipeline.dataset_path(DECISIONS_FILE);
    let before = std::fs::read(&out).unwrap();
    let manifest_before = RunManifest::load(&pipeline.config().data_dir).unwrap();

    let mut config = pipeline.config().clone();
    config.risk.policy = RiskPolicy::WeightedCap;
    // A directory cannot be opened as a database
    config.store.path = Some(dir.path().to_path_buf());
    let broken = Pipeline::from_config(config).unwrap();

    let err = broken.run_log(common::scenario_log()).unwrap_err();
    assert!(matches!(err, PipelineError::Store(_)), "{}", err);
    assert_eq!(std::fs::read(&out).unwrap(), before);
    let manifest_after = RunManifest::load(&pipeline.config().data_dir).unwrap();
    assert_eq!(manifest_after.run_id, manifest_before.run_id);
}

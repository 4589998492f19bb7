//! Pipeline orchestrator: events → features → scores → explanations → decisions.
//!
//! Each stage consumes the previous stage's complete output and persists its
//! own dataset. The final decision dataset is only written once every stage
//! has succeeded.

mod manifest;

pub use manifest::{RunManifest, MANIFEST_FILE};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::events::{read_event_log, EventLog};
use crate::explain::{ExplainedBatch, Explainer};
use crate::features::{FeatureAggregator, FeatureBatch};
use crate::model::{InferenceEngine, ScoredBatch, ScoringModel};
use crate::risk::{DecisionBatch, RiskEngine};
use crate::storage::datasets::{
    self, DECISIONS_FILE, EXPLAINED_FILE, FEATURES_FILE, SCORED_FILE,
};
use crate::storage::{DatasetDigest, DecisionStore};
use chrono::Utc;
use std::path::Path;
use tracing::{info, info_span};
use uuid::Uuid;

/// Result of a full run
#[derive(Debug)]
pub struct RunReport {
    pub manifest: RunManifest,
    pub decisions: DecisionBatch,
}

pub struct Pipeline {
    config: PipelineConfig,
    aggregator: FeatureAggregator,
    engine: InferenceEngine,
    explainer: Explainer,
    risk: RiskEngine,
}

impl Pipeline {
    /// Build with the model named in the configuration.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let model = ScoringModel::load(&config.model_path)?;
        Ok(Self::new(config, model))
    }

    pub fn new(config: PipelineConfig, model: ScoringModel) -> Self {
        Self {
            aggregator: FeatureAggregator::new(config.features.clone()),
            engine: InferenceEngine::new(model),
            explainer: Explainer::new(&config.explain),
            risk: RiskEngine::new(&config.risk),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dataset_path(&self, file: &str) -> std::path::PathBuf {
        self.config.data_dir.join(file)
    }

    /// Full run over the configured event log.
    pub fn run(&self) -> Result<RunReport> {
        let log = read_event_log(&self.config.events_path)?;
        self.run_log(log)
    }

    /// Full run over an already-parsed event log.
    pub fn run_log(&self, log: EventLog) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("run", %run_id, batch = %log.batch);
        let _guard = span.enter();
        info!(events = log.events.len(), skipped_rows = log.skipped_rows, "pipeline run started");

        let mut digests: Vec<DatasetDigest> = Vec::with_capacity(4);

        let features = self.aggregate(&log);
        let vectors = features.vectors.len();
        digests.push(datasets::write_features(&self.dataset_path(FEATURES_FILE), &features)?);

        let scored = self.detect(features)?;
        let anomalies = scored.anomaly_count();
        digests.push(datasets::write_scored(&self.dataset_path(SCORED_FILE), &scored)?);

        let explained = self.explain(scored)?;
        digests.push(datasets::write_explained(&self.dataset_path(EXPLAINED_FILE), &explained)?);

        let decisions = self.decide(explained)?;

        // The store refresh may still fail; decisions.csv only lands after it
        if self.config.store.enabled {
            let store = DecisionStore::open(&self.config.store_path())?;
            store.replace_batch(&decisions)?;
        }
        digests.push(datasets::write_decisions(&self.dataset_path(DECISIONS_FILE), &decisions)?);

        let manifest = RunManifest {
            run_id,
            batch: log.batch.clone(),
            started_at,
            finished_at: Utc::now(),
            rule_set: decisions.rule_set.clone(),
            model: self.engine.model().name().to_string(),
            schema_version: self.engine.model().schema().version,
            window_secs: self.config.features.window_secs,
            events: log.events.len(),
            skipped_rows: log.skipped_rows,
            vectors,
            anomalies,
            severity: decisions.severity_counts(),
            datasets: digests,
        };
        manifest.write(&self.config.data_dir)?;
        info!(vectors, anomalies, rule_set = %manifest.rule_set, "pipeline run complete");

        Ok(RunReport {
            manifest,
            decisions,
        })
    }

    pub fn aggregate(&self, log: &EventLog) -> FeatureBatch {
        self.aggregator.aggregate(&log.batch, &log.events)
    }

    pub fn detect(&self, features: FeatureBatch) -> Result<ScoredBatch> {
        self.engine.score(features)
    }

    pub fn explain(&self, scored: ScoredBatch) -> Result<ExplainedBatch> {
        self.explainer.explain(scored)
    }

    pub fn decide(&self, explained: ExplainedBatch) -> Result<DecisionBatch> {
        self.risk.assess(explained)
    }

    /// Stage 2 standalone: feature dataset → scored dataset
    pub fn detect_stage(&self, input: &Path, out: &Path, batch: &str) -> Result<DatasetDigest> {
        let (features, _) = datasets::read_features(input, batch)?;
        datasets::write_scored(out, &self.detect(features)?)
    }
}

/// Stage 1 standalone: event log → feature dataset
pub fn features_stage(config: &PipelineConfig, events: &Path, out: &Path) -> Result<DatasetDigest> {
    let log = read_event_log(events)?;
    let features = FeatureAggregator::new(config.features.clone()).aggregate(&log.batch, &log.events);
    datasets::write_features(out, &features)
}

/// Stage 3 standalone: scored dataset → explained dataset
pub fn explain_stage(config: &PipelineConfig, input: &Path, out: &Path, batch: &str) -> Result<DatasetDigest> {
    let (scored, _) = datasets::read_scored(input, batch)?;
    datasets::write_explained(out, &Explainer::new(&config.explain).explain(scored)?)
}

/// Stage 4 standalone: explained dataset → decision dataset
pub fn decide_stage(config: &PipelineConfig, input: &Path, out: &Path, batch: &str) -> Result<DatasetDigest> {
    let (explained, _) = datasets::read_explained(input, batch)?;
    datasets::write_decisions(out, &RiskEngine::new(&config.risk).assess(explained)?)
}

//! traffic-guard: traffic anomaly detection and mitigation decisions.
//!
//! Modular structure:
//! - [`events`]: Raw request event log parsing
//! - [`features`]: Per-entity, per-window behavioral feature aggregation
//! - [`model`]: Schema-bound outlier model inference
//! - [`explain`]: Baseline deviation explanations
//! - [`risk`]: Versioned risk scoring rule sets, severity and action
//! - [`pipeline`]: Stage orchestration over persisted datasets
//! - [`storage`]: CSV datasets and the decision store
//! - [`logging`]: Structured logging

pub mod config;
pub mod error;
pub mod events;
pub mod features;
pub mod model;
pub mod explain;
pub mod risk;
pub mod pipeline;
pub mod storage;
pub mod logging;

pub use config::PipelineConfig;
pub use error::{PipelineError, SchemaViolation};
pub use events::{EventLog, RawEvent};
pub use features::{FeatureAggregator, FeatureBatch, FeatureVector};
pub use model::{InferenceEngine, ScoringModel};
pub use explain::Explainer;
pub use risk::{RiskEngine, Severity};
pub use pipeline::Pipeline;
pub use storage::DecisionStore;
pub use logging::StructuredLogger;

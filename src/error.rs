//! Pipeline error taxonomy. Every fatal variant names the batch or artifact it
//! came from; malformed input rows are never errors (they are counted and skipped).

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Structural mismatch between a model artifact and the live feature stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("model artifact {artifact} declares no feature schema")]
    MissingSchema { artifact: String },

    #[error("batch {batch} is missing model features: {}", missing.join(", "))]
    MissingFeatures { batch: String, missing: Vec<String> },
}

/// Failures raised by a detector backend or while validating its artifact.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid model artifact {artifact}: {reason}")]
    InvalidArtifact { artifact: String, reason: String },

    #[error("unsupported model format version {0}")]
    UnsupportedVersion(u32),

    #[error("row has {got} values, model expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("detector backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("schema contract violation: {0}")]
    SchemaContract(#[from] SchemaViolation),

    #[error("batch {batch} has no records labeled Normal; baseline is undefined")]
    EmptyBaselinePopulation { batch: String },

    #[error("dataset {dataset} is missing columns: {}", missing.join(", "))]
    MissingColumns { dataset: String, missing: Vec<String> },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decision store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("decision store {0} does not exist; run the pipeline first")]
    StoreNotFound(PathBuf),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

//! Persisted stage datasets and the decision store.

pub mod datasets;
mod decisions;

pub use datasets::DatasetDigest;
pub use decisions::{DecisionQuery, DecisionStore, StoredDecision};

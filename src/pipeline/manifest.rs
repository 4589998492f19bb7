//! Per-run audit record. Run id and timestamps live here only, so the
//! datasets themselves stay byte-identical across reruns.

use crate::error::Result;
use crate::risk::Severity;
use crate::storage::datasets::write_atomic;
use crate::storage::DatasetDigest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "run_manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub batch: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rule_set: String,
    pub model: String,
    pub schema_version: u32,
    pub window_secs: u64,
    pub events: usize,
    pub skipped_rows: usize,
    pub vectors: usize,
    pub anomalies: usize,
    pub severity: BTreeMap<Severity, usize>,
    pub datasets: Vec<DatasetDigest>,
}

impl RunManifest {
    pub fn write(&self, dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(MANIFEST_FILE), &bytes)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let data = std::fs::read(&path).map_err(|e| crate::error::PipelineError::io(&path, e))?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn digest(&self, name: &str) -> Option<&str> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.sha256.as_str())
    }
}

//! Pipeline configuration. Loaded from a JSON file; missing file means defaults.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory for intermediate and final datasets, manifest and store
    pub data_dir: PathBuf,
    /// Raw request event log (CSV)
    pub events_path: PathBuf,
    /// Model manifest (schema + detector)
    pub model_path: PathBuf,
    /// Feature aggregation parameters
    pub features: FeaturesConfig,
    /// Deviation check multipliers
    pub explain: ExplainConfig,
    /// Rule set selection and severity thresholds
    pub risk: RiskConfig,
    /// Decision store for dashboard consumers
    pub store: StoreConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Aggregation window length (seconds)
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    pub rate_multiplier: f64,
    pub error_multiplier: f64,
    pub latency_multiplier: f64,
    pub payload_multiplier: f64,
    pub endpoint_multiplier: f64,
}

/// Which rule set governs a run. Exactly one applies end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RiskPolicy {
    Composite,
    WeightedCap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub policy: RiskPolicy,
    pub composite: SeverityThresholds,
    pub weighted_cap: SeverityThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    /// Score at or above this is high severity
    pub high_threshold: f64,
    /// Score at or above this is medium severity
    pub medium_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub enabled: bool,
    /// Defaults to `<data_dir>/decisions.db`
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/processed"),
            events_path: PathBuf::from("data/raw/traffic_logs.csv"),
            model_path: PathBuf::from("models/isolation_forest.json"),
            features: FeaturesConfig::default(),
            explain: ExplainConfig::default(),
            risk: RiskConfig::default(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self { window_secs: 60 }
    }
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            rate_multiplier: 2.0,
            error_multiplier: 2.0,
            latency_multiplier: 1.5,
            payload_multiplier: 1.5,
            endpoint_multiplier: 1.5,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            policy: RiskPolicy::Composite,
            composite: SeverityThresholds {
                high_threshold: 7.0,
                medium_threshold: 4.0,
            },
            weighted_cap: SeverityThresholds {
                high_threshold: 70.0,
                medium_threshold: 40.0,
            },
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RiskConfig {
    /// Thresholds of the selected rule set
    pub fn thresholds(&self) -> SeverityThresholds {
        match self.policy {
            RiskPolicy::Composite => self.composite,
            RiskPolicy::WeightedCap => self.weighted_cap,
        }
    }
}

impl PipelineConfig {
    /// Load from JSON file if present; otherwise return default.
    /// A file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let config: PipelineConfig = serde_json::from_str(&data)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.features.window_secs == 0 {
            return Err(PipelineError::Config("features.window_secs must be > 0".into()));
        }
        let e = &self.explain;
        for (name, m) in [
            ("rate_multiplier", e.rate_multiplier),
            ("error_multiplier", e.error_multiplier),
            ("latency_multiplier", e.latency_multiplier),
            ("payload_multiplier", e.payload_multiplier),
            ("endpoint_multiplier", e.endpoint_multiplier),
        ] {
            if !(m.is_finite() && m > 0.0) {
                return Err(PipelineError::Config(format!("explain.{} must be positive", name)));
            }
        }
        for (name, t) in [
            ("composite", self.risk.composite),
            ("weighted_cap", self.risk.weighted_cap),
        ] {
            if t.medium_threshold > t.high_threshold {
                return Err(PipelineError::Config(format!(
                    "risk.{}: medium_threshold {} exceeds high_threshold {}",
                    name, t.medium_threshold, t.high_threshold
                )));
            }
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("decisions.db"))
    }
}

//! Log setup and ndjson decision lines for downstream ingestion.

use serde::Serialize;
use std::io::Write;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// One decision as emitted by `query`
#[derive(Serialize)]
pub struct DecisionLine<'a> {
    pub batch: &'a str,
    pub entity_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_start: Option<&'a str>,
    pub risk_score: f64,
    pub severity: &'a str,
    pub anomaly_label: &'a str,
    pub action: &'a str,
    pub explanation: &'a str,
    pub rule_set: &'a str,
}

impl<'a> From<&'a crate::storage::StoredDecision> for DecisionLine<'a> {
    fn from(d: &'a crate::storage::StoredDecision) -> Self {
        Self {
            batch: &d.batch,
            entity_id: &d.entity_id,
            window_start: d.window_start.as_deref(),
            risk_score: d.risk_score,
            severity: &d.severity,
            anomaly_label: &d.anomaly_label,
            action: &d.recommended_action,
            explanation: &d.explanation,
            rule_set: &d.rule_set,
        }
    }
}

pub struct StructuredLogger;

impl StructuredLogger {
    /// Install global subscriber writing to stderr; RUST_LOG overrides `default_level`.
    pub fn init(json: bool, default_level: &str) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        if json {
            let fmt = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NONE)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();
        } else {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init();
        }
    }

    /// Emit a single JSON line without going through tracing
    pub fn emit_json(event: &impl Serialize, w: &mut impl Write) -> std::io::Result<()> {
        let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
        writeln!(w, "{}", line)
    }
}

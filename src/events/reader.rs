//! CSV event log reader. Malformed rows are skipped and counted, never fatal.

use super::RawEvent;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// (canonical column, legacy alias) pairs every event log must carry
const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("timestamp", "timestamp"),
    ("entity_id", "ip"),
    ("endpoint", "endpoint"),
    ("status_code", "status"),
    ("request_size", "req_size"),
    ("response_time", "resp_time"),
];

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Deserialize)]
struct LogRow {
    timestamp: String,
    #[serde(alias = "ip")]
    entity_id: String,
    endpoint: String,
    #[serde(default)]
    method: String,
    #[serde(alias = "status")]
    status_code: u16,
    #[serde(alias = "req_size")]
    request_size: f64,
    #[serde(alias = "resp_time")]
    response_time: f64,
    #[serde(default, alias = "user_agent")]
    client_signature: String,
}

/// Events parsed from one log, in file order
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    /// Batch name, used in every diagnostic about this log
    pub batch: String,
    pub events: Vec<RawEvent>,
    pub skipped_rows: usize,
}

impl EventLog {
    pub fn from_reader<R: Read>(batch: impl Into<String>, rdr: R) -> Result<Self> {
        let batch = batch.into();
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);

        let headers = csv.headers()?.clone();
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|(name, alias)| !headers.iter().any(|h| h == *name || h == *alias))
            .map(|(name, _)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingColumns {
                dataset: batch,
                missing,
            });
        }

        let mut events = Vec::new();
        let mut skipped_rows = 0usize;
        for (idx, row) in csv.deserialize::<LogRow>().enumerate() {
            let parsed = row
                .map_err(|e| e.to_string())
                .and_then(|r| into_event(r).map_err(|e| e.to_string()));
            match parsed {
                Ok(ev) => events.push(ev),
                Err(reason) => {
                    skipped_rows += 1;
                    debug!(batch = %batch, row = idx + 1, %reason, "skipping malformed event row");
                }
            }
        }

        if skipped_rows > 0 {
            warn!(batch = %batch, skipped_rows, "malformed event rows skipped");
        }
        info!(batch = %batch, events = events.len(), "event log loaded");
        Ok(Self {
            batch,
            events,
            skipped_rows,
        })
    }
}

/// Read an event log from disk; the batch is named after the file stem.
pub fn read_event_log(path: &Path) -> Result<EventLog> {
    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let batch = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    EventLog::from_reader(batch, std::io::BufReader::new(file))
}

fn into_event(row: LogRow) -> std::result::Result<RawEvent, String> {
    let timestamp = parse_timestamp(&row.timestamp)
        .ok_or_else(|| format!("unparseable timestamp {:?}", row.timestamp))?;
    if row.entity_id.is_empty() {
        return Err("empty entity_id".into());
    }
    if !row.request_size.is_finite() || !row.response_time.is_finite() {
        return Err("non-finite numeric field".into());
    }
    Ok(RawEvent {
        timestamp,
        entity_id: row.entity_id,
        endpoint: row.endpoint,
        method: row.method,
        status_code: row.status_code,
        request_size: row.request_size,
        response_time: row.response_time,
        client_signature: row.client_signature,
    })
}

/// RFC 3339, or a naive date-time taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T12:00:05Z").is_some());
        assert!(parse_timestamp("2024-03-01 12:00:05.123456").is_some());
        assert!(parse_timestamp("2024-03-01 12:00:05").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn legacy_headers_and_bad_rows() {
        let csv = "timestamp,ip,endpoint,method,status,req_size,resp_time,user_agent\n\
                   2024-03-01 12:00:05,10.0.0.1,/login,POST,401,900,300,bot-agent\n\
                   not-a-time,10.0.0.1,/login,POST,401,900,300,bot-agent\n\
                   2024-03-01 12:00:06,10.0.0.1,/login,POST,abc,900,300,bot-agent\n";
        let log = EventLog::from_reader("legacy", csv.as_bytes()).unwrap();
        assert_eq!(log.events.len(), 1);
        assert_eq!(log.skipped_rows, 2);
        assert_eq!(log.events[0].entity_id, "10.0.0.1");
        assert_eq!(log.events[0].client_signature, "bot-agent");
    }

    #[test]
    fn missing_header_is_fatal() {
        let csv = "timestamp,entity_id,endpoint\n2024-03-01T12:00:05Z,a,/\n";
        let err = EventLog::from_reader("short", csv.as_bytes()).unwrap_err();
        match err {
            PipelineError::MissingColumns { dataset, missing } => {
                assert_eq!(dataset, "short");
                assert_eq!(missing, vec!["status_code", "request_size", "response_time"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

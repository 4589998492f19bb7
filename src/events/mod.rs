//! Raw request events: one immutable record per observed request.

mod reader;

pub use reader::{read_event_log, EventLog};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single observed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub timestamp: DateTime<Utc>,
    /// Source address of the request
    pub entity_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub request_size: f64,
    /// Response latency (ms)
    pub response_time: f64,
    /// Client user agent or equivalent fingerprint
    pub client_signature: String,
}

impl RawEvent {
    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

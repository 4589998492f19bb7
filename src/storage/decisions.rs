//! SQLite-backed decision store read by dashboard consumers.
//! A batch is only ever replaced as a whole; records are never updated in place.

use crate::error::{PipelineError, Result};
use crate::risk::{DecisionBatch, Severity};
use rusqlite::{params, params_from_iter, types::Value, Connection, OpenFlags};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Flat, read-only view of one decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDecision {
    pub batch: String,
    pub entity_id: String,
    pub window_start: Option<String>,
    pub request_count: i64,
    pub error_rate: f64,
    pub burst_score: f64,
    pub anomaly_score: f64,
    pub anomaly_label: String,
    pub explanation: String,
    pub risk_score: f64,
    pub severity: String,
    pub recommended_action: String,
    pub rule_set: String,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionQuery {
    pub batch: Option<String>,
    /// Only records at or above this severity
    pub min_severity: Option<Severity>,
    pub label: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

pub struct DecisionStore {
    conn: Mutex<Connection>,
}

impl DecisionStore {
    /// Open or create DB at path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an existing store for reading only; never creates the file.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::StoreNotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                batch TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                window_start TEXT,
                request_count INTEGER NOT NULL,
                error_rate REAL NOT NULL,
                burst_score REAL NOT NULL,
                anomaly_score REAL NOT NULL,
                anomaly_label TEXT NOT NULL,
                explanation TEXT NOT NULL,
                risk_score REAL NOT NULL,
                severity TEXT NOT NULL,
                severity_rank INTEGER NOT NULL,
                recommended_action TEXT NOT NULL,
                rule_set TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_decisions_batch ON decisions(batch);
            CREATE INDEX IF NOT EXISTS idx_decisions_severity ON decisions(severity_rank);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Replace every record of the batch in one transaction.
    pub fn replace_batch(&self, batch: &DecisionBatch) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM decisions WHERE batch = ?1", params![batch.batch])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO decisions (batch, entity_id, window_start, request_count, error_rate,
                    burst_score, anomaly_score, anomaly_label, explanation, risk_score, severity,
                    severity_rank, recommended_action, rule_set)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for d in &batch.records {
                let s = &d.explained.scored;
                let f = &s.features;
                stmt.execute(params![
                    batch.batch,
                    f.entity_id,
                    f.window_start.map(|w| w.to_rfc3339()),
                    f.request_count as i64,
                    f.error_rate,
                    f.burst_score,
                    s.anomaly_score,
                    s.anomaly_label.as_str(),
                    d.explained.explanation,
                    d.assessment.risk_score,
                    d.assessment.severity.as_str(),
                    d.assessment.severity as i64,
                    d.assessment.recommended_action,
                    d.assessment.rule_set,
                ])?;
            }
        }
        tx.commit()?;
        info!(batch = %batch.batch, records = batch.records.len(), "decision store batch replaced");
        Ok(batch.records.len())
    }

    /// Filtered read, highest risk first.
    pub fn query(&self, q: &DecisionQuery) -> Result<Vec<StoredDecision>> {
        let mut sql = String::from(
            "SELECT batch, entity_id, window_start, request_count, error_rate, burst_score,
                    anomaly_score, anomaly_label, explanation, risk_score, severity,
                    recommended_action, rule_set
             FROM decisions WHERE 1 = 1",
        );
        let mut args: Vec<Value> = Vec::new();
        if let Some(b) = &q.batch {
            args.push(Value::Text(b.clone()));
            sql.push_str(&format!(" AND batch = ?{}", args.len()));
        }
        if let Some(s) = q.min_severity {
            args.push(Value::Integer(s as i64));
            sql.push_str(&format!(" AND severity_rank >= ?{}", args.len()));
        }
        if let Some(l) = &q.label {
            args.push(Value::Text(l.clone()));
            sql.push_str(&format!(" AND anomaly_label = ?{}", args.len()));
        }
        if let Some(e) = &q.entity_id {
            args.push(Value::Text(e.clone()));
            sql.push_str(&format!(" AND entity_id = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY risk_score DESC, entity_id ASC, window_start ASC");
        if let Some(limit) = q.limit {
            args.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", args.len()));
        }

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok(StoredDecision {
                batch: row.get(0)?,
                entity_id: row.get(1)?,
                window_start: row.get(2)?,
                request_count: row.get(3)?,
                error_rate: row.get(4)?,
                burst_score: row.get(5)?,
                anomaly_score: row.get(6)?,
                anomaly_label: row.get(7)?,
                explanation: row.get(8)?,
                risk_score: row.get(9)?,
                severity: row.get(10)?,
                recommended_action: row.get(11)?,
                rule_set: row.get(12)?,
            })
        })?;
        let out = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(out)
    }

    pub fn severity_counts(&self, batch: &str) -> Result<BTreeMap<String, usize>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt =
            conn.prepare("SELECT severity, COUNT(*) FROM decisions WHERE batch = ?1 GROUP BY severity")?;
        let rows = stmt.query_map(params![batch], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        let counts = rows.collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }
}

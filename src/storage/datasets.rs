//! Stage datasets persisted as CSV. Writes are all-or-nothing (temp file +
//! rename) and return a SHA-256 digest of the bytes written.

use crate::error::{PipelineError, Result};
use crate::explain::{ExplainedBatch, ExplainedRecord};
use crate::features::{FeatureBatch, FeatureColumns, FeatureName, FeatureVector};
use crate::model::{AnomalyLabel, ScoredBatch, ScoredRecord};
use crate::risk::{DecisionBatch, Severity};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const FEATURES_FILE: &str = "features.csv";
pub const SCORED_FILE: &str = "anomaly_results.csv";
pub const EXPLAINED_FILE: &str = "anomaly_explanations.csv";
pub const DECISIONS_FILE: &str = "decisions.csv";

/// Columns every feature-bearing dataset must carry
const FEATURE_REQUIRED: &[&str] = &[
    "entity_id",
    "request_count",
    "avg_response_time",
    "error_rate",
    "burst_score",
];

const FEATURE_COLUMNS: &[&str] = &[
    "entity_id",
    "window_start",
    "request_count",
    "avg_response_time",
    "error_rate",
    "avg_request_size",
    "unique_endpoint_count",
    "burst_score",
];
const SCORE_COLUMNS: &[&str] = &["anomaly_score", "anomaly_label"];
const EXPLANATION_COLUMNS: &[&str] = &["explanation"];
const DECISION_COLUMNS: &[&str] = &["risk_score", "severity", "recommended_action", "rule_set"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDigest {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FeatureRow {
    #[serde(alias = "ip")]
    entity_id: String,
    #[serde(default)]
    window_start: Option<DateTime<Utc>>,
    #[serde(alias = "req_per_min")]
    request_count: u64,
    #[serde(alias = "avg_resp_time")]
    avg_response_time: f64,
    error_rate: f64,
    #[serde(default, alias = "avg_req_size")]
    avg_request_size: Option<f64>,
    #[serde(default, alias = "unique_endpoints")]
    unique_endpoint_count: Option<u64>,
    burst_score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScoredRow {
    #[serde(alias = "ip")]
    entity_id: String,
    #[serde(default)]
    window_start: Option<DateTime<Utc>>,
    #[serde(alias = "req_per_min")]
    request_count: u64,
    #[serde(alias = "avg_resp_time")]
    avg_response_time: f64,
    error_rate: f64,
    #[serde(default, alias = "avg_req_size")]
    avg_request_size: Option<f64>,
    #[serde(default, alias = "unique_endpoints")]
    unique_endpoint_count: Option<u64>,
    burst_score: f64,
    anomaly_score: f64,
    anomaly_label: AnomalyLabel,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExplainedRow {
    #[serde(alias = "ip")]
    entity_id: String,
    #[serde(default)]
    window_start: Option<DateTime<Utc>>,
    #[serde(alias = "req_per_min")]
    request_count: u64,
    #[serde(alias = "avg_resp_time")]
    avg_response_time: f64,
    error_rate: f64,
    #[serde(default, alias = "avg_req_size")]
    avg_request_size: Option<f64>,
    #[serde(default, alias = "unique_endpoints")]
    unique_endpoint_count: Option<u64>,
    burst_score: f64,
    anomaly_score: f64,
    anomaly_label: AnomalyLabel,
    explanation: String,
}

#[derive(Debug, Serialize)]
struct DecisionRow<'a> {
    entity_id: &'a str,
    window_start: Option<DateTime<Utc>>,
    request_count: u64,
    avg_response_time: f64,
    error_rate: f64,
    avg_request_size: Option<f64>,
    unique_endpoint_count: Option<u64>,
    burst_score: f64,
    anomaly_score: f64,
    anomaly_label: AnomalyLabel,
    explanation: &'a str,
    risk_score: f64,
    severity: Severity,
    recommended_action: &'a str,
    rule_set: &'a str,
}

/// Per-row value checks applied after deserialization
trait CheckedRow: DeserializeOwned {
    fn check(&self) -> std::result::Result<(), String>;
}

fn check_features(
    avg_response_time: f64,
    error_rate: f64,
    avg_request_size: Option<f64>,
    burst_score: f64,
) -> std::result::Result<(), String> {
    if !(avg_response_time.is_finite() && avg_response_time >= 0.0) {
        return Err(format!("avg_response_time {} is not a finite non-negative number", avg_response_time));
    }
    if let Some(size) = avg_request_size {
        if !(size.is_finite() && size >= 0.0) {
            return Err(format!("avg_request_size {} is not a finite non-negative number", size));
        }
    }
    for (name, v) in [("error_rate", error_rate), ("burst_score", burst_score)] {
        if !(0.0..=1.0).contains(&v) {
            return Err(format!("{} {} is outside [0, 1]", name, v));
        }
    }
    Ok(())
}

impl CheckedRow for FeatureRow {
    fn check(&self) -> std::result::Result<(), String> {
        check_features(self.avg_response_time, self.error_rate, self.avg_request_size, self.burst_score)
    }
}

impl CheckedRow for ScoredRow {
    fn check(&self) -> std::result::Result<(), String> {
        check_features(self.avg_response_time, self.error_rate, self.avg_request_size, self.burst_score)?;
        if !self.anomaly_score.is_finite() {
            return Err(format!("anomaly_score {} is not finite", self.anomaly_score));
        }
        Ok(())
    }
}

impl CheckedRow for ExplainedRow {
    fn check(&self) -> std::result::Result<(), String> {
        check_features(self.avg_response_time, self.error_rate, self.avg_request_size, self.burst_score)?;
        if !self.anomaly_score.is_finite() {
            return Err(format!("anomaly_score {} is not finite", self.anomaly_score));
        }
        Ok(())
    }
}

impl FeatureRow {
    fn from_vector(v: &FeatureVector) -> Self {
        Self {
            entity_id: v.entity_id.clone(),
            window_start: v.window_start,
            request_count: v.request_count,
            avg_response_time: v.avg_response_time,
            error_rate: v.error_rate,
            avg_request_size: v.avg_request_size,
            unique_endpoint_count: v.unique_endpoint_count,
            burst_score: v.burst_score,
        }
    }

    fn into_vector(self) -> FeatureVector {
        FeatureVector {
            entity_id: self.entity_id,
            window_start: self.window_start,
            request_count: self.request_count,
            avg_response_time: self.avg_response_time,
            error_rate: self.error_rate,
            avg_request_size: self.avg_request_size,
            unique_endpoint_count: self.unique_endpoint_count,
            burst_score: self.burst_score,
        }
    }
}

impl ScoredRow {
    fn from_record(r: &ScoredRecord) -> Self {
        let v = &r.features;
        Self {
            entity_id: v.entity_id.clone(),
            window_start: v.window_start,
            request_count: v.request_count,
            avg_response_time: v.avg_response_time,
            error_rate: v.error_rate,
            avg_request_size: v.avg_request_size,
            unique_endpoint_count: v.unique_endpoint_count,
            burst_score: v.burst_score,
            anomaly_score: r.anomaly_score,
            anomaly_label: r.anomaly_label,
        }
    }

    fn into_record(self) -> ScoredRecord {
        ScoredRecord {
            features: FeatureVector {
                entity_id: self.entity_id,
                window_start: self.window_start,
                request_count: self.request_count,
                avg_response_time: self.avg_response_time,
                error_rate: self.error_rate,
                avg_request_size: self.avg_request_size,
                unique_endpoint_count: self.unique_endpoint_count,
                burst_score: self.burst_score,
            },
            anomaly_score: self.anomaly_score,
            anomaly_label: self.anomaly_label,
        }
    }
}

impl ExplainedRow {
    fn from_record(r: &ExplainedRecord) -> Self {
        let s = ScoredRow::from_record(&r.scored);
        Self {
            entity_id: s.entity_id,
            window_start: s.window_start,
            request_count: s.request_count,
            avg_response_time: s.avg_response_time,
            error_rate: s.error_rate,
            avg_request_size: s.avg_request_size,
            unique_endpoint_count: s.unique_endpoint_count,
            burst_score: s.burst_score,
            anomaly_score: s.anomaly_score,
            anomaly_label: s.anomaly_label,
            explanation: r.explanation.clone(),
        }
    }

    fn into_record(self) -> ExplainedRecord {
        let scored = ScoredRow {
            entity_id: self.entity_id,
            window_start: self.window_start,
            request_count: self.request_count,
            avg_response_time: self.avg_response_time,
            error_rate: self.error_rate,
            avg_request_size: self.avg_request_size,
            unique_endpoint_count: self.unique_endpoint_count,
            burst_score: self.burst_score,
            anomaly_score: self.anomaly_score,
            anomaly_label: self.anomaly_label,
        }
        .into_record();
        ExplainedRecord {
            scored,
            explanation: self.explanation,
        }
    }
}

pub fn write_features(path: &Path, batch: &FeatureBatch) -> Result<DatasetDigest> {
    write_rows(path, &[FEATURE_COLUMNS], batch.vectors.iter().map(FeatureRow::from_vector))
}

pub fn write_scored(path: &Path, batch: &ScoredBatch) -> Result<DatasetDigest> {
    write_rows(
        path,
        &[FEATURE_COLUMNS, SCORE_COLUMNS],
        batch.records.iter().map(ScoredRow::from_record),
    )
}

pub fn write_explained(path: &Path, batch: &ExplainedBatch) -> Result<DatasetDigest> {
    write_rows(
        path,
        &[FEATURE_COLUMNS, SCORE_COLUMNS, EXPLANATION_COLUMNS],
        batch.records.iter().map(ExplainedRow::from_record),
    )
}

pub fn write_decisions(path: &Path, batch: &DecisionBatch) -> Result<DatasetDigest> {
    write_rows(
        path,
        &[FEATURE_COLUMNS, SCORE_COLUMNS, EXPLANATION_COLUMNS, DECISION_COLUMNS],
        batch.records.iter().map(|d| {
            let s = &d.explained.scored;
            let v = &s.features;
            DecisionRow {
                entity_id: &v.entity_id,
                window_start: v.window_start,
                request_count: v.request_count,
                avg_response_time: v.avg_response_time,
                error_rate: v.error_rate,
                avg_request_size: v.avg_request_size,
                unique_endpoint_count: v.unique_endpoint_count,
                burst_score: v.burst_score,
                anomaly_score: s.anomaly_score,
                anomaly_label: s.anomaly_label,
                explanation: &d.explained.explanation,
                risk_score: d.assessment.risk_score,
                severity: d.assessment.severity,
                recommended_action: &d.assessment.recommended_action,
                rule_set: &d.assessment.rule_set,
            }
        }),
    )
}

/// Read a feature dataset. Returns the batch and the number of skipped rows.
pub fn read_features(path: &Path, batch: &str) -> Result<(FeatureBatch, usize)> {
    let loaded = read_rows::<FeatureRow>(path, batch, &[])?;
    let (columns, vectors, dropped) = settle_columns(
        &loaded.headers,
        loaded.rows.into_iter().map(FeatureRow::into_vector).collect(),
        |v| v,
    );
    Ok((
        FeatureBatch {
            batch: batch.to_string(),
            columns,
            vectors,
        },
        loaded.skipped + dropped,
    ))
}

pub fn read_scored(path: &Path, batch: &str) -> Result<(ScoredBatch, usize)> {
    let loaded = read_rows::<ScoredRow>(path, batch, &["anomaly_score", "anomaly_label"])?;
    let (columns, records, dropped) = settle_columns(
        &loaded.headers,
        loaded.rows.into_iter().map(ScoredRow::into_record).collect(),
        |r| &r.features,
    );
    Ok((
        ScoredBatch {
            batch: batch.to_string(),
            columns,
            records,
        },
        loaded.skipped + dropped,
    ))
}

pub fn read_explained(path: &Path, batch: &str) -> Result<(ExplainedBatch, usize)> {
    let loaded = read_rows::<ExplainedRow>(
        path,
        batch,
        &["anomaly_score", "anomaly_label", "explanation"],
    )?;
    let (columns, records, dropped) = settle_columns(
        &loaded.headers,
        loaded.rows.into_iter().map(ExplainedRow::into_record).collect(),
        |r| &r.scored.features,
    );
    Ok((
        ExplainedBatch {
            batch: batch.to_string(),
            columns,
            baseline: None,
            records,
        },
        loaded.skipped + dropped,
    ))
}

struct Loaded<T> {
    headers: Vec<String>,
    rows: Vec<T>,
    skipped: usize,
}

fn read_rows<T: CheckedRow>(path: &Path, batch: &str, extra_required: &[&str]) -> Result<Loaded<T>> {
    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(std::io::BufReader::new(file));

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        // Empty dataset written for an empty batch
        return Ok(Loaded {
            headers,
            rows: Vec::new(),
            skipped: 0,
        });
    }

    let has = |name: &str| {
        headers.iter().any(|h| {
            h == name
                || (name == "entity_id" && h == "ip")
                || FeatureName::resolve(h).map(|f| f.as_str()) == Some(name)
        })
    };
    let missing: Vec<String> = FEATURE_REQUIRED
        .iter()
        .chain(extra_required)
        .filter(|c| !has(c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumns {
            dataset: format!("{} ({})", batch, path.display()),
            missing,
        });
    }

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (idx, row) in rdr.deserialize::<T>().enumerate() {
        match row.map_err(|e| e.to_string()).and_then(|r| r.check().map(|_| r)) {
            Ok(r) => rows.push(r),
            Err(reason) => {
                skipped += 1;
                debug!(batch, row = idx + 1, %reason, "skipping malformed dataset row");
            }
        }
    }
    if skipped > 0 {
        warn!(batch, path = %path.display(), skipped, "malformed dataset rows skipped");
    }
    Ok(Loaded {
        headers,
        rows,
        skipped,
    })
}

/// Decide which optional feature columns the batch carries. An optional column
/// counts as present when its header exists and at least one row has a value
/// (or there are no rows at all); rows lacking a value in a present column are
/// dropped and counted.
fn settle_columns<R>(
    headers: &[String],
    rows: Vec<R>,
    features: impl Fn(&R) -> &FeatureVector,
) -> (FeatureColumns, Vec<R>, usize) {
    let mut columns = FeatureColumns::all();
    for f in FeatureName::ALL.into_iter().filter(FeatureName::is_optional) {
        let in_header = headers.iter().any(|h| FeatureName::resolve(h) == Some(f));
        let any_value = rows.is_empty() || rows.iter().any(|r| features(r).value(f).is_some());
        if !(in_header && any_value) {
            columns.remove(f);
        }
    }

    let before = rows.len();
    let rows: Vec<R> = rows
        .into_iter()
        .filter(|r| columns.iter().all(|f| features(r).value(f).is_some()))
        .collect();
    let dropped = before - rows.len();
    if dropped > 0 {
        warn!(dropped, "rows missing values in present feature columns dropped");
    }
    (columns, rows, dropped)
}

/// `header` is written explicitly for an empty dataset; otherwise serde
/// derives it from the first row.
fn write_rows<T: Serialize>(
    path: &Path,
    header: &[&[&str]],
    rows: impl Iterator<Item = T>,
) -> Result<DatasetDigest> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    let mut count = 0usize;
    for row in rows {
        wtr.serialize(row)?;
        count += 1;
    }
    if count == 0 {
        wtr.write_record(header.iter().flat_map(|cols| cols.iter().copied()))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| PipelineError::io(path, e.into_error()))?;

    let digest = hex::encode(Sha256::digest(&bytes));
    write_atomic(path, &bytes)?;
    debug!(path = %path.display(), rows = count, sha256 = %digest, "dataset written");

    Ok(DatasetDigest {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        rows: count,
        sha256: digest,
    })
}

/// Write to a sibling temp file, then rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(|e| PipelineError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

//! Candidate listing from the external system-of-record.
//!
//! The backend's domain collections (landowners, JMR, notices, payments,
//! awards) are opaque JSON rows served over HTTP. Each row that carries
//! enough identifier fields becomes a sync candidate: a row key plus the raw
//! record, canonicalized before hashing so volatile bookkeeping fields never
//! poison the snapshot hash.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use bhoomi_types::{LedgerError, RowKey};

/// Collections polled for candidate rows, in priority order: the first
/// collection that yields a row key wins, later duplicates are dropped.
const COLLECTIONS: &[&str] = &["landowners", "jmr", "notices", "payments", "awards"];

/// Bookkeeping fields that must not participate in snapshot hashing.
const VOLATILE_KEYS: &[&str] = &["createdAt", "updatedAt", "__v", "timestamp", "id"];

/// One row of the system-of-record eligible for chaining.
#[derive(Debug, Clone)]
pub struct SyncCandidate {
    pub row_key: RowKey,
    /// Raw source row; canonicalized at write time, not here, so malformed
    /// rows surface as per-row failures instead of vanishing at listing.
    pub record: Value,
}

impl SyncCandidate {
    /// Build a candidate from a raw collection row.
    ///
    /// Identifier fields are accepted under both snake_case and camelCase
    /// names. Rows without a usable identifier are rejected.
    pub fn from_record(project_id: &str, record: Value) -> Result<Self, LedgerError> {
        let new_survey = field(
            &record,
            &["new_survey_number", "newSurveyNumber", "survey_number", "surveyNumber"],
        );
        let old_survey = field(&record, &["old_survey_number", "oldSurveyNumber"]);
        let cts = field(&record, &["cts_number", "ctsNumber"]);
        let serial = field(&record, &["serial_number", "serialNumber", "sr_no", "srNo"]);

        let row_key = RowKey::new(
            project_id,
            new_survey.as_deref(),
            old_survey.as_deref(),
            cts.as_deref(),
            serial.as_deref(),
        )?;
        Ok(Self { row_key, record })
    }
}

/// Serial numbers arrive as bare integers from some collections.
fn field(record: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match record.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Strip volatile keys at every nesting level, preserving everything else.
pub fn canonicalize_record(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, inner) in map {
                if VOLATILE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(key.clone(), canonicalize_record(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_record).collect()),
        scalar => scalar.clone(),
    }
}

/// Async seam over the external collections, for tests and alternate
/// backends.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// List candidate rows, optionally scoped to one project.
    ///
    /// Collection-level failures are tolerated per collection; the listing
    /// only fails outright when every collection is unreachable.
    async fn list_candidates(
        &self,
        project_id: Option<&str>,
    ) -> Result<Vec<SyncCandidate>, LedgerError>;
}

/// HTTP-backed record source hitting the collaborator endpoints.
pub struct HttpRecordSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecordSource {
    /// Build a source with a bounded per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::SourceUnavailable(format!("client build failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_collection(
        &self,
        collection: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<Value>, LedgerError> {
        let url = match project_id {
            Some(p) => format!("{}/{collection}/{p}", self.base_url),
            None => format!("{}/{collection}", self.base_url),
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LedgerError::SourceUnavailable(format!("{collection}: {e}")))?;
        if !response.status().is_success() {
            return Err(LedgerError::SourceUnavailable(format!(
                "{collection}: HTTP {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| LedgerError::SourceUnavailable(format!("{collection}: {e}")))?;
        Ok(extract_rows(body))
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    async fn list_candidates(
        &self,
        project_id: Option<&str>,
    ) -> Result<Vec<SyncCandidate>, LedgerError> {
        let mut candidates: Vec<SyncCandidate> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut failures = 0;

        for collection in COLLECTIONS {
            let rows = match self.fetch_collection(collection, project_id).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(collection, error = %e, "collection listing failed, continuing");
                    failures += 1;
                    continue;
                }
            };

            for row in rows {
                let project = field(&row, &["project_id", "projectId"])
                    .or_else(|| project_id.map(str::to_string))
                    .unwrap_or_default();
                match SyncCandidate::from_record(&project, row) {
                    Ok(candidate) => {
                        let canonical = candidate.row_key.canonical();
                        if !seen.contains(&canonical) {
                            seen.push(canonical);
                            candidates.push(candidate);
                        }
                    }
                    Err(e) => debug!(collection, error = %e, "row skipped: no usable key"),
                }
            }
        }

        if failures == COLLECTIONS.len() {
            return Err(LedgerError::SourceUnavailable(
                "all source collections unreachable".to_string(),
            ));
        }
        Ok(candidates)
    }
}

/// Accept both the backend's `{success, data: [...]}` envelope and a bare
/// array body.
fn extract_rows(body: Value) -> Vec<Value> {
    match body {
        Value::Array(rows) => rows,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

//! Wire DTOs for the `/blockchain/*` surface.
//!
//! Field names match what the dashboards already send and read, including
//! the vestigial blockchain terminology on the status endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bhoomi_ledger::LedgerEntry;

/// The `{success, message?, data?}` envelope every endpoint returns.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, message: None, data: Some(data) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()), data: None }
    }
}

/// Flat wire form of a ledger entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntryDto {
    pub block_id: String,
    pub row_key: String,
    pub project_id: String,
    pub survey_number: Option<String>,
    pub event_type: String,
    pub payload: Value,
    pub previous_hash: String,
    pub current_hash: String,
    pub hash_version: String,
    pub nonce: u64,
    pub timestamp: DateTime<Utc>,
    pub officer_id: String,
    pub remarks: Option<String>,
}

impl From<&LedgerEntry> for EntryDto {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            block_id: entry.block_id.clone(),
            row_key: entry.row_key.canonical(),
            project_id: entry.row_key.project_id.clone(),
            survey_number: entry.survey_number.clone(),
            event_type: entry.event_type.wire_name().to_string(),
            payload: entry.payload.to_value(),
            previous_hash: entry.previous_hash.clone(),
            current_hash: entry.current_hash.clone(),
            hash_version: entry.hash_version.as_str().to_string(),
            nonce: entry.nonce,
            timestamp: entry.timestamp,
            officer_id: entry.officer_id.clone(),
            remarks: entry.remarks.clone(),
        }
    }
}

/// Status payload; network/chain/gas fields are retained for dashboard
/// compatibility and mapped onto real ledger health.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusData {
    pub network: String,
    pub chain_id: u64,
    pub connected: bool,
    pub block_number: usize,
    pub gas_price: String,
    pub is_initialized: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ScanParams {
    pub limit: Option<usize>,
    pub after: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
}

/// Query for single-row verification; the dashboards send camelCase.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRowParams {
    pub project_id: Option<String>,
    pub new_survey_number: Option<String>,
    pub old_survey_number: Option<String>,
    pub cts_number: Option<String>,
    pub serial_number: Option<String>,
    pub row_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRowBlockBody {
    pub project_id: String,
    pub new_survey_number: Option<String>,
    pub old_survey_number: Option<String>,
    pub cts_number: Option<String>,
    pub serial_number: Option<String>,
    pub officer_id: String,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkSyncBody {
    pub officer_id: String,
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddTimelineEntryBody {
    pub survey_number: String,
    pub action: String,
    pub officer_id: String,
    pub data_hash: Option<String>,
    pub previous_hash: Option<String>,
    pub metadata: Option<Value>,
    pub remarks: Option<String>,
}

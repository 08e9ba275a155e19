//! Hash chain primitive: canonical content hashes and chain links.
//!
//! Pure functions over entry fields; no I/O. Two schemes exist side by side:
//! `v1` is the header-only scheme older deployments wrote (the payload was
//! not part of the preimage), `v2` hashes the full canonical preimage. New
//! entries are always `v2`; verification recomputes each entry under the
//! scheme it was written with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use bhoomi_types::{EventPayload, EventType, LedgerError, RowKey};

/// Domain prefix mixed into every genesis hash.
const GENESIS_PREFIX: &str = "bhoomi-genesis:";

/// Hashing scheme an entry was written under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashScheme {
    #[serde(rename = "v1")]
    V1,
    #[serde(rename = "v2")]
    V2,
}

impl HashScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashScheme::V1 => "v1",
            HashScheme::V2 => "v2",
        }
    }

    pub fn from_str(raw: &str) -> Result<Self, LedgerError> {
        match raw {
            "v1" => Ok(HashScheme::V1),
            "v2" => Ok(HashScheme::V2),
            other => Err(LedgerError::InvalidEntryInput(format!(
                "unknown hash version {other:?}"
            ))),
        }
    }
}

/// The fields that participate in an entry hash.
#[derive(Debug, Clone, Copy)]
pub struct HashInput<'a> {
    pub row_key: &'a RowKey,
    pub event_type: EventType,
    pub payload: &'a EventPayload,
    pub previous_hash: &'a str,
    pub timestamp: &'a DateTime<Utc>,
    pub nonce: u64,
    pub officer_id: &'a str,
}

/// Compute the hex-encoded SHA-256 entry hash under the given scheme.
///
/// Deterministic: identical inputs always yield identical output, and any
/// single-field change changes the output.
pub fn compute_entry_hash(scheme: HashScheme, input: &HashInput<'_>) -> String {
    let mut hasher = Sha256::new();
    match scheme {
        HashScheme::V2 => {
            hasher.update(input.row_key.canonical());
            hasher.update(input.event_type.wire_name());
            hasher.update(canonical_json(&input.payload.to_value()));
            hasher.update(input.previous_hash);
            hasher.update(input.timestamp.to_rfc3339());
            hasher.update(input.nonce.to_string());
        }
        HashScheme::V1 => {
            // Header-only preimage; the payload never participated.
            hasher.update(input.row_key.effective_survey().unwrap_or_default());
            hasher.update(input.event_type.wire_name());
            hasher.update(input.officer_id);
            hasher.update(input.timestamp.to_rfc3339());
            hasher.update(input.previous_hash);
            hasher.update(input.nonce.to_string());
        }
    }
    hex::encode(hasher.finalize())
}

/// Deterministic seed used as `previous_hash` for the first entry of a key.
///
/// Derived from the canonical row key alone, so verification of a chain's
/// first entry needs no external state and survives process restarts.
pub fn genesis_hash(row_key: &RowKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(GENESIS_PREFIX);
    hasher.update(row_key.canonical());
    hex::encode(hasher.finalize())
}

/// Content hash of a payload alone (used to validate caller-supplied
/// `data_hash` values on the manual timeline surface).
pub fn payload_hash(payload: &EventPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&payload.to_value()));
    hex::encode(hasher.finalize())
}

/// Deterministic JSON stringify with sorted keys at every nesting level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

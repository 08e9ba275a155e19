//! LedgerEntry: a single hash-chained record of one lifecycle event.
//!
//! Each entry snapshots one event for one row key, linked to the previous
//! entry for that key via `previous_hash` to form a tamper-evident chain.
//! Entries are append-only; corrections are new entries, never edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bhoomi_types::{EventPayload, EventType, LedgerError, RowKey};

use crate::hash::{compute_entry_hash, HashInput, HashScheme};

/// One tamper-evident record of a single event affecting one row key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub block_id: String,
    pub row_key: RowKey,
    /// Denormalized effective survey number, for survey-scoped queries.
    pub survey_number: Option<String>,
    pub event_type: EventType,
    pub payload: EventPayload,
    pub previous_hash: String,
    pub current_hash: String,
    pub hash_version: HashScheme,
    pub nonce: u64,
    pub timestamp: DateTime<Utc>,
    pub officer_id: String,
    pub remarks: Option<String>,
}

impl LedgerEntry {
    /// Create a new entry chained onto `previous_hash`.
    ///
    /// Stamps the current time, derives the event type from the payload, and
    /// computes `current_hash` under the current scheme. The block id is
    /// generation-time unique and not part of the hash preimage.
    pub fn new(
        row_key: RowKey,
        payload: EventPayload,
        previous_hash: String,
        nonce: u64,
        officer_id: &str,
        remarks: Option<String>,
    ) -> Result<Self, LedgerError> {
        let officer_id = officer_id.trim();
        if officer_id.is_empty() {
            return Err(LedgerError::InvalidEntryInput(
                "officer_id is required".to_string(),
            ));
        }

        let event_type = payload.event_type();
        let timestamp = Utc::now();
        let current_hash = compute_entry_hash(
            HashScheme::V2,
            &HashInput {
                row_key: &row_key,
                event_type,
                payload: &payload,
                previous_hash: &previous_hash,
                timestamp: &timestamp,
                nonce,
                officer_id,
            },
        );

        Ok(Self {
            block_id: new_block_id(),
            survey_number: row_key.effective_survey().map(str::to_string),
            row_key,
            event_type,
            payload,
            previous_hash,
            current_hash,
            hash_version: HashScheme::V2,
            nonce,
            timestamp,
            officer_id: officer_id.to_string(),
            remarks,
        })
    }

    /// Replace the block id after a generation collision.
    ///
    /// Safe because the block id is not part of the hash preimage.
    pub fn regenerate_block_id(&mut self) {
        self.block_id = new_block_id();
    }

    /// Recompute this entry's hash from its stored fields, under the scheme
    /// it was written with. Compare against `current_hash` to detect tampering.
    pub fn recompute_hash(&self) -> String {
        compute_entry_hash(
            self.hash_version,
            &HashInput {
                row_key: &self.row_key,
                event_type: self.event_type,
                payload: &self.payload,
                previous_hash: &self.previous_hash,
                timestamp: &self.timestamp,
                nonce: self.nonce,
                officer_id: &self.officer_id,
            },
        )
    }
}

fn new_block_id() -> String {
    format!("BLOCK-{}", Uuid::new_v4())
}

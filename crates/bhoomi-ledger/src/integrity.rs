//! Chain verification: recompute stored hashes and check linkage.
//!
//! `verify_chain` walks one row key's entries oldest-first, recomputing each
//! entry's hash under the scheme it was written with and checking that every
//! `previous_hash` matches the preceding entry's `current_hash` (genesis for
//! the first). The walk stops at the first break and reports its index along
//! with the recomputed ("live") and stored ("chain") hashes for diagnostics.

use serde::{Deserialize, Serialize};

use crate::entry::LedgerEntry;
use crate::hash::{compute_entry_hash, genesis_hash, HashInput, HashScheme};

/// Why a verification run produced its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationReason {
    /// Every entry recomputed cleanly and the linkage is intact.
    Valid,
    /// The row key has no entries. Not an error.
    NotOnChain,
    /// An entry's stored hash does not match its recomputation.
    HashMismatch,
    /// An entry's `previous_hash` does not match the prior entry's hash.
    LinkageBroken,
    /// The live source row no longer matches what was chained.
    SourceDrift,
}

/// Conceptual per-key status, driven only by verification runs.
///
/// `Compromised` is sticky for reporting until a newer entry supersedes it;
/// the stored chain itself is never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    NotOnChain,
    Pending,
    Verified,
    Compromised,
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChainState::NotOnChain => "not_on_chain",
            ChainState::Pending => "pending",
            ChainState::Verified => "verified",
            ChainState::Compromised => "compromised",
        };
        f.write_str(s)
    }
}

/// The result of verifying one row key's chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub reason: VerificationReason,
    /// Index (0-based, oldest first) of the first broken entry, if any.
    pub broken_at_index: Option<usize>,
    /// Recomputed hash at the break point.
    pub live_hash: Option<String>,
    /// Stored hash at the break point.
    pub chain_hash: Option<String>,
    pub total_entries: usize,
    pub message: String,
}

impl VerificationResult {
    pub fn not_on_chain() -> Self {
        Self {
            is_valid: false,
            reason: VerificationReason::NotOnChain,
            broken_at_index: None,
            live_hash: None,
            chain_hash: None,
            total_entries: 0,
            message: "no entries exist for this key".to_string(),
        }
    }

    pub fn valid(total_entries: usize) -> Self {
        Self {
            is_valid: true,
            reason: VerificationReason::Valid,
            broken_at_index: None,
            live_hash: None,
            chain_hash: None,
            total_entries,
            message: format!("all {total_entries} entries verified"),
        }
    }

    /// The conceptual state this result maps to.
    pub fn state(&self) -> ChainState {
        match self.reason {
            VerificationReason::NotOnChain => ChainState::NotOnChain,
            VerificationReason::Valid => ChainState::Verified,
            _ => ChainState::Compromised,
        }
    }
}

/// Outcome of checking the latest entry against the live source row.
///
/// Detects content-vs-chain drift: the underlying record changed since it was
/// chained, as opposed to internal chain corruption. `live_hash` is the v2
/// recomputation from the live row, `legacy_live_hash` the v1 recomputation,
/// and `chain_hash` the stored value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVerification {
    pub is_valid: bool,
    pub reason: VerificationReason,
    pub live_hash: Option<String>,
    pub legacy_live_hash: Option<String>,
    pub chain_hash: Option<String>,
    pub block_id: Option<String>,
}

impl SourceVerification {
    pub fn not_on_chain() -> Self {
        Self {
            is_valid: false,
            reason: VerificationReason::NotOnChain,
            live_hash: None,
            legacy_live_hash: None,
            chain_hash: None,
            block_id: None,
        }
    }
}

/// Walk one row key's chain oldest-first and verify every entry.
///
/// All entries must belong to the same row key; the expected seed for the
/// first entry is that key's genesis hash.
pub fn verify_chain(entries: &[LedgerEntry]) -> VerificationResult {
    let Some(first) = entries.first() else {
        return VerificationResult::not_on_chain();
    };

    let total_entries = entries.len();
    let mut expected_previous = genesis_hash(&first.row_key);

    for (i, entry) in entries.iter().enumerate() {
        if entry.previous_hash != expected_previous {
            return VerificationResult {
                is_valid: false,
                reason: VerificationReason::LinkageBroken,
                broken_at_index: Some(i),
                live_hash: Some(expected_previous.clone()),
                chain_hash: Some(entry.previous_hash.clone()),
                total_entries,
                message: format!(
                    "chain broken at entry {i}: expected previous hash {expected_previous}, found {}",
                    entry.previous_hash
                ),
            };
        }

        let recomputed = entry.recompute_hash();
        if entry.current_hash != recomputed {
            return VerificationResult {
                is_valid: false,
                reason: VerificationReason::HashMismatch,
                broken_at_index: Some(i),
                live_hash: Some(recomputed.clone()),
                chain_hash: Some(entry.current_hash.clone()),
                total_entries,
                message: format!(
                    "hash mismatch at entry {i}: stored {}, recomputed {recomputed}",
                    entry.current_hash
                ),
            };
        }

        expected_previous = entry.current_hash.clone();
    }

    VerificationResult::valid(total_entries)
}

/// Recompute the latest entry's hash as if its payload were regenerated from
/// the live source row, under both schemes, and compare to the stored value.
pub fn verify_entry_against_source(
    latest: &LedgerEntry,
    live_payload: &bhoomi_types::EventPayload,
) -> SourceVerification {
    let input = HashInput {
        row_key: &latest.row_key,
        event_type: latest.event_type,
        payload: live_payload,
        previous_hash: &latest.previous_hash,
        timestamp: &latest.timestamp,
        nonce: latest.nonce,
        officer_id: &latest.officer_id,
    };
    let live_hash = compute_entry_hash(HashScheme::V2, &input);
    let legacy_live_hash = compute_entry_hash(HashScheme::V1, &input);

    let expected = match latest.hash_version {
        HashScheme::V2 => &live_hash,
        HashScheme::V1 => &legacy_live_hash,
    };
    let is_valid = *expected == latest.current_hash;

    SourceVerification {
        is_valid,
        reason: if is_valid {
            VerificationReason::Valid
        } else {
            VerificationReason::SourceDrift
        },
        live_hash: Some(live_hash),
        legacy_live_hash: Some(legacy_live_hash),
        chain_hash: Some(latest.current_hash.clone()),
        block_id: Some(latest.block_id.clone()),
    }
}

//! LedgerService: the only component that appends to the entry store.
//!
//! Enforces the business rules atop the raw chain mechanics: read the tail,
//! compute hashes, append, and retry the whole cycle a bounded number of
//! times when a concurrent writer wins the race for the same row key. Also
//! keeps a presentation-only per-key status cache driven by verification
//! runs; the store remains the single source of truth.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use bhoomi_types::{EventPayload, EventType, LedgerError, RowKey};

use crate::entry::LedgerEntry;
use crate::hash::{genesis_hash, payload_hash};
use crate::integrity::{
    verify_chain, verify_entry_against_source, ChainState, SourceVerification, VerificationResult,
};
use crate::store::{EntryStore, ScanPage};

/// Bound on read-compute-append cycles under contention.
const MAX_APPEND_RETRIES: usize = 4;

/// Bound on block id regenerations after a generation collision.
const MAX_BLOCK_ID_RETRIES: usize = 3;

pub struct LedgerService {
    store: Mutex<EntryStore>,
    nonce: AtomicU64,
    states: Mutex<HashMap<String, ChainState>>,
}

impl LedgerService {
    pub fn new(store: EntryStore) -> Self {
        Self {
            store: Mutex::new(store),
            // Seeded from wall-clock millis so nonces stay unique across
            // restarts even for identical payloads.
            nonce: AtomicU64::new(Utc::now().timestamp_millis() as u64),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Open the store at `path` and wrap it in a service.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        Ok(Self::new(EntryStore::open(path)?))
    }

    /// Append one event for `row_key`, chaining onto the current tail.
    ///
    /// On a lost race (`ChainViolation`) the whole read-compute-append cycle
    /// is retried up to the bound, then `ConcurrentModification` is surfaced.
    /// Block id collisions are regenerated transparently.
    pub fn create_or_append(
        &self,
        row_key: &RowKey,
        payload: EventPayload,
        officer_id: &str,
        remarks: Option<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        for attempt in 0..MAX_APPEND_RETRIES {
            let previous_hash = match self.store()?.latest(row_key)? {
                Some(tail) => tail.current_hash,
                None => genesis_hash(row_key),
            };

            let mut entry = LedgerEntry::new(
                row_key.clone(),
                payload.clone(),
                previous_hash,
                self.next_nonce(),
                officer_id,
                remarks.clone(),
            )?;

            let mut id_attempts = 0;
            loop {
                let outcome = self.store()?.append(&entry);
                match outcome {
                    Ok(()) => {
                        self.set_state(row_key, ChainState::Pending);
                        debug!(
                            row_key = %row_key,
                            block_id = %entry.block_id,
                            event = %entry.event_type,
                            "entry appended"
                        );
                        return Ok(entry);
                    }
                    Err(LedgerError::DuplicateBlockId(id)) => {
                        if id_attempts >= MAX_BLOCK_ID_RETRIES {
                            return Err(LedgerError::DuplicateBlockId(id));
                        }
                        id_attempts += 1;
                        entry.regenerate_block_id();
                    }
                    Err(LedgerError::ChainViolation { .. }) => {
                        warn!(row_key = %row_key, attempt, "append lost race, retrying");
                        std::thread::sleep(Duration::from_millis(2 * (attempt as u64 + 1)));
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Err(LedgerError::ConcurrentModification(row_key.canonical()))
    }

    /// Manual append with caller-supplied linkage, keyed by survey number.
    ///
    /// The supplied `previous_hash` and `data_hash` are validated against the
    /// store's actual tail and the canonical payload hash, never trusted
    /// blindly. The survey must already be on chain.
    pub fn append_manual(
        &self,
        survey: &str,
        event_type: EventType,
        metadata: Value,
        officer_id: &str,
        supplied_previous_hash: Option<&str>,
        supplied_data_hash: Option<&str>,
        remarks: Option<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        let payload = EventPayload::from_parts(event_type, metadata)?;

        if let Some(expected) = supplied_data_hash {
            let actual = payload_hash(&payload);
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(LedgerError::InvalidEntryInput(format!(
                    "data_hash {expected} does not match the submitted metadata"
                )));
            }
        }

        let latest = self
            .store()?
            .latest_for_survey(survey)?
            .ok_or_else(|| LedgerError::NotFound(format!("survey {survey} is not on chain")))?;

        if let Some(prev) = supplied_previous_hash {
            if prev != latest.current_hash {
                return Err(LedgerError::ChainViolation {
                    row_key: latest.row_key.canonical(),
                    expected: latest.current_hash,
                    found: prev.to_string(),
                });
            }
        }

        self.create_or_append(&latest.row_key, payload, officer_id, remarks)
    }

    /// Verify one row key's chain and update its cached state.
    pub fn verify(&self, row_key: &RowKey) -> Result<VerificationResult, LedgerError> {
        let chain = self.store()?.chain(row_key)?;
        let result = verify_chain(&chain);
        self.set_state(row_key, result.state());
        Ok(result)
    }

    /// Verify every chain touching a survey number.
    ///
    /// A survey may hold several row keys (one per serial); each sub-chain is
    /// verified independently and the first break wins. `broken_at_index` is
    /// relative to the failing key's own chain.
    pub fn verify_survey(&self, survey: &str) -> Result<VerificationResult, LedgerError> {
        let entries = self.store()?.entries_for_survey(survey)?;
        if entries.is_empty() {
            return Ok(VerificationResult::not_on_chain());
        }

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<LedgerEntry>> = HashMap::new();
        for entry in entries {
            let canonical = entry.row_key.canonical();
            if !groups.contains_key(&canonical) {
                order.push(canonical.clone());
            }
            groups.entry(canonical).or_default().push(entry);
        }

        let mut total = 0;
        for canonical in order {
            let chain = &groups[&canonical];
            let result = verify_chain(chain);
            self.set_state(&chain[0].row_key, result.state());
            if !result.is_valid {
                return Ok(result);
            }
            total += result.total_entries;
        }
        Ok(VerificationResult::valid(total))
    }

    /// Compare the latest entry's stored hash against a recomputation from
    /// the live source row. Detects content drift in the source record,
    /// which is distinct from internal linkage corruption.
    pub fn verify_against_source(
        &self,
        row_key: &RowKey,
        live_payload: &EventPayload,
    ) -> Result<SourceVerification, LedgerError> {
        match self.store()?.latest(row_key)? {
            Some(latest) => Ok(verify_entry_against_source(&latest, live_payload)),
            None => Ok(SourceVerification::not_on_chain()),
        }
    }

    /// Cached per-key state; falls back to existence when never verified.
    pub fn state_of(&self, row_key: &RowKey) -> Result<ChainState, LedgerError> {
        if let Some(state) = self
            .states
            .lock()
            .ok()
            .and_then(|map| map.get(&row_key.canonical()).copied())
        {
            return Ok(state);
        }
        Ok(if self.exists_for_key(row_key)? {
            ChainState::Pending
        } else {
            ChainState::NotOnChain
        })
    }

    // Read-side passthroughs.

    pub fn chain(&self, row_key: &RowKey) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store()?.chain(row_key)
    }

    pub fn latest(&self, row_key: &RowKey) -> Result<Option<LedgerEntry>, LedgerError> {
        self.store()?.latest(row_key)
    }

    pub fn exists_for_key(&self, row_key: &RowKey) -> Result<bool, LedgerError> {
        self.store()?.exists_for_key(row_key)
    }

    pub fn find_by_block_id(&self, block_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        self.store()?.find_by_block_id(block_id)
    }

    pub fn entries_for_survey(&self, survey: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store()?.entries_for_survey(survey)
    }

    pub fn latest_for_survey(&self, survey: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        self.store()?.latest_for_survey(survey)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store()?.recent(limit)
    }

    pub fn scan_by_project(
        &self,
        project_id: &str,
        limit: usize,
        after: Option<i64>,
    ) -> Result<ScanPage, LedgerError> {
        self.store()?.scan_by_project(project_id, limit, after)
    }

    /// Total entries across all keys (the "chain height" the status endpoint
    /// reports).
    pub fn height(&self) -> Result<usize, LedgerError> {
        self.store()?.count(None)
    }

    pub(crate) fn store(&self) -> Result<MutexGuard<'_, EntryStore>, LedgerError> {
        self.store
            .lock()
            .map_err(|_| LedgerError::Storage("entry store mutex poisoned".to_string()))
    }

    fn set_state(&self, row_key: &RowKey, state: ChainState) {
        if let Ok(mut map) = self.states.lock() {
            map.insert(row_key.canonical(), state);
        }
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::VerificationReason;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn test_service() -> (NamedTempFile, LedgerService) {
        let tmp = NamedTempFile::new().unwrap();
        let service = LedgerService::open(tmp.path()).unwrap();
        (tmp, service)
    }

    fn sample_key(serial: &str) -> RowKey {
        RowKey::new("P1", Some("S-40"), None, None, Some(serial)).unwrap()
    }

    #[test]
    fn create_then_verify_is_valid() {
        let (_tmp, service) = test_service();
        let key = sample_key("1");

        let entry = service
            .create_or_append(
                &key,
                EventPayload::JmrMeasurement {
                    measured_area_sq_m: 1520.5,
                    village: "Khamloli".to_string(),
                    taluka: None,
                    jmr_reference: None,
                },
                "officer-1",
                None,
            )
            .unwrap();
        assert_eq!(entry.previous_hash, genesis_hash(&key));

        let result = service.verify(&key).unwrap();
        assert!(result.is_valid, "{}", result.message);
        assert_eq!(result.reason, VerificationReason::Valid);
        assert_eq!(service.state_of(&key).unwrap(), ChainState::Verified);
    }

    #[test]
    fn second_append_links_to_first() {
        let (_tmp, service) = test_service();
        let key = sample_key("1");

        let first = service
            .create_or_append(
                &key,
                EventPayload::PaymentPending { amount: 100.0 },
                "officer-1",
                None,
            )
            .unwrap();
        let second = service
            .create_or_append(
                &key,
                EventPayload::PaymentReleased { amount: 100.0, utr_number: None },
                "officer-1",
                None,
            )
            .unwrap();

        assert_eq!(second.previous_hash, first.current_hash);
        assert_eq!(service.chain(&key).unwrap().len(), 2);
        assert!(service.verify(&key).unwrap().is_valid);
    }

    #[test]
    fn verify_unknown_key_is_not_on_chain() {
        let (_tmp, service) = test_service();
        let key = RowKey::new("P1", Some("S-999"), None, None, None).unwrap();

        let result = service.verify(&key).unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.reason, VerificationReason::NotOnChain);
        assert_eq!(service.state_of(&key).unwrap(), ChainState::NotOnChain);
    }

    #[test]
    fn nonces_are_unique_per_append() {
        let (_tmp, service) = test_service();
        let key = sample_key("1");
        let payload = EventPayload::PaymentPending { amount: 1.0 };

        let a = service
            .create_or_append(&key, payload.clone(), "officer-1", None)
            .unwrap();
        let b = service
            .create_or_append(&key, payload, "officer-1", None)
            .unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.current_hash, b.current_hash);
    }

    #[test]
    fn append_marks_state_pending_until_verified() {
        let (_tmp, service) = test_service();
        let key = sample_key("1");

        assert_eq!(service.state_of(&key).unwrap(), ChainState::NotOnChain);
        service
            .create_or_append(
                &key,
                EventPayload::PaymentPending { amount: 1.0 },
                "officer-1",
                None,
            )
            .unwrap();
        assert_eq!(service.state_of(&key).unwrap(), ChainState::Pending);
        service.verify(&key).unwrap();
        assert_eq!(service.state_of(&key).unwrap(), ChainState::Verified);
    }

    #[test]
    fn append_manual_validates_linkage() {
        let (_tmp, service) = test_service();
        let key = sample_key("1");
        let first = service
            .create_or_append(
                &key,
                EventPayload::PaymentPending { amount: 1.0 },
                "officer-1",
                None,
            )
            .unwrap();

        // Correct linkage succeeds.
        let entry = service
            .append_manual(
                "S-40",
                EventType::PaymentReleased,
                json!({"amount": 1.0}),
                "officer-2",
                Some(&first.current_hash),
                None,
                Some("released".to_string()),
            )
            .unwrap();
        assert_eq!(entry.previous_hash, first.current_hash);

        // Stale linkage is rejected.
        let err = service
            .append_manual(
                "S-40",
                EventType::PaymentFailed,
                json!({"amount": 1.0, "failure_reason": "bounced"}),
                "officer-2",
                Some(&first.current_hash),
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::ChainViolation { .. }));
    }

    #[test]
    fn append_manual_rejects_bad_data_hash() {
        let (_tmp, service) = test_service();
        let key = sample_key("1");
        service
            .create_or_append(
                &key,
                EventPayload::PaymentPending { amount: 1.0 },
                "officer-1",
                None,
            )
            .unwrap();

        let err = service
            .append_manual(
                "S-40",
                EventType::PaymentReleased,
                json!({"amount": 1.0}),
                "officer-2",
                None,
                Some("deadbeef"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidEntryInput(_)));
    }

    #[test]
    fn append_manual_requires_survey_on_chain() {
        let (_tmp, service) = test_service();
        let err = service
            .append_manual(
                "S-404",
                EventType::NoticeGenerated,
                json!({"notice_number": "N-1", "notice_date": "2024-01-01"}),
                "officer-1",
                None,
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn verify_survey_covers_all_serials() {
        let (_tmp, service) = test_service();
        for serial in ["1", "2", "3"] {
            service
                .create_or_append(
                    &sample_key(serial),
                    EventPayload::PaymentPending { amount: 1.0 },
                    "officer-1",
                    None,
                )
                .unwrap();
        }

        let result = service.verify_survey("S-40").unwrap();
        assert!(result.is_valid);
        assert_eq!(result.total_entries, 3);

        let missing = service.verify_survey("S-999").unwrap();
        assert_eq!(missing.reason, VerificationReason::NotOnChain);
    }

    #[test]
    fn source_drift_is_reported() {
        let (_tmp, service) = test_service();
        let key = sample_key("1");
        service
            .create_or_append(
                &key,
                EventPayload::PaymentPending { amount: 100.0 },
                "officer-1",
                None,
            )
            .unwrap();

        let same = service
            .verify_against_source(&key, &EventPayload::PaymentPending { amount: 100.0 })
            .unwrap();
        assert!(same.is_valid);

        let drifted = service
            .verify_against_source(&key, &EventPayload::PaymentPending { amount: 200.0 })
            .unwrap();
        assert!(!drifted.is_valid);
        assert_eq!(drifted.reason, VerificationReason::SourceDrift);
    }
}

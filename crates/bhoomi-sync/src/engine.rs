//! Bounded-concurrency reconciliation of candidates against the ledger.
//!
//! Workers pull candidates off a shared cursor, so a slow row never stalls
//! the rest of the batch. Cancellation is cooperative: in-flight rows finish,
//! queued rows are never started.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use bhoomi_ledger::{LedgerService, VerificationResult};
use bhoomi_types::EventPayload;

use crate::source::{canonicalize_record, SyncCandidate};

/// Cap on worker count regardless of configuration.
const MAX_WORKERS: usize = 8;

/// Per-row outcome of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Created,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub row_key: String,
    pub status: SyncStatus,
    pub block_id: Option<String>,
    pub error: Option<String>,
}

/// Aggregated result of one sync run. Failures are collected here, never
/// thrown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncReport {
    /// Rows actually processed (cancelled rows are absent entirely).
    pub fn processed(&self) -> usize {
        self.created + self.skipped + self.failed
    }
}

/// Per-row outcome of a bulk verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub row_key: String,
    pub result: VerificationResult,
}

pub struct SyncEngine {
    service: Arc<LedgerService>,
    workers: usize,
}

impl SyncEngine {
    pub fn new(service: Arc<LedgerService>, concurrency: usize) -> Self {
        Self {
            service,
            workers: concurrency.clamp(1, MAX_WORKERS),
        }
    }

    /// Backfill chain entries for every candidate not yet on chain.
    ///
    /// Idempotent: keys that already exist are reported as skipped, so
    /// re-running on the same candidate set never duplicates entries.
    pub async fn sync_missing(
        &self,
        candidates: Vec<SyncCandidate>,
        officer_id: &str,
        cancel: watch::Receiver<bool>,
    ) -> SyncReport {
        let total = candidates.len();
        let outcomes = self
            .run_pool(candidates, cancel, {
                let officer_id = officer_id.to_string();
                move |service, candidate| sync_one(service, candidate, &officer_id)
            })
            .await;

        let mut report = SyncReport::default();
        for outcome in outcomes {
            match outcome.status {
                SyncStatus::Created => report.created += 1,
                SyncStatus::Skipped => report.skipped += 1,
                SyncStatus::Failed => report.failed += 1,
            }
            report.outcomes.push(outcome);
        }
        info!(
            total,
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            "bulk sync finished"
        );
        report
    }

    /// Re-verify every candidate's chain, read-only, with the same pool
    /// shape as `sync_missing`.
    pub async fn verify_all(
        &self,
        candidates: Vec<SyncCandidate>,
        cancel: watch::Receiver<bool>,
    ) -> Vec<VerifyOutcome> {
        self.run_pool(candidates, cancel, |service, candidate| {
            let row_key = candidate.row_key.canonical();
            let result = service
                .verify(&candidate.row_key)
                .unwrap_or_else(|e| storage_failure(&e.to_string()));
            VerifyOutcome { row_key, result }
        })
        .await
    }

    /// Spawn `self.workers` tasks pulling candidates off a shared cursor.
    async fn run_pool<T, F>(
        &self,
        candidates: Vec<SyncCandidate>,
        cancel: watch::Receiver<bool>,
        work: F,
    ) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(&LedgerService, &SyncCandidate) -> T + Clone + Send + Sync + 'static,
    {
        let candidates = Arc::new(candidates);
        let cursor = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let service = Arc::clone(&self.service);
            let candidates = Arc::clone(&candidates);
            let cursor = Arc::clone(&cursor);
            let cancel = cancel.clone();
            let work = work.clone();

            handles.push(tokio::spawn(async move {
                let mut results = Vec::new();
                loop {
                    if *cancel.borrow() {
                        break;
                    }
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    if index >= candidates.len() {
                        break;
                    }
                    results.push(work(&service, &candidates[index]));
                    // Yield between rows so cancellation and other tasks get
                    // a chance to run.
                    tokio::task::yield_now().await;
                }
                results
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(results) => all.extend(results),
                Err(e) => warn!(error = %e, "sync worker panicked"),
            }
        }
        all
    }
}

fn sync_one(service: &LedgerService, candidate: &SyncCandidate, officer_id: &str) -> SyncOutcome {
    let row_key = candidate.row_key.canonical();

    match service.exists_for_key(&candidate.row_key) {
        Ok(true) => {
            return SyncOutcome {
                row_key,
                status: SyncStatus::Skipped,
                block_id: None,
                error: None,
            }
        }
        Ok(false) => {}
        Err(e) => {
            return SyncOutcome {
                row_key,
                status: SyncStatus::Failed,
                block_id: None,
                error: Some(e.to_string()),
            }
        }
    }

    let payload = match EventPayload::snapshot(canonicalize_record(&candidate.record)) {
        Ok(payload) => payload,
        Err(e) => {
            return SyncOutcome {
                row_key,
                status: SyncStatus::Failed,
                block_id: None,
                error: Some(e.to_string()),
            }
        }
    };

    match service.create_or_append(
        &candidate.row_key,
        payload,
        officer_id,
        Some("bulk sync backfill".to_string()),
    ) {
        Ok(entry) => SyncOutcome {
            row_key,
            status: SyncStatus::Created,
            block_id: Some(entry.block_id),
            error: None,
        },
        Err(e) => SyncOutcome {
            row_key,
            status: SyncStatus::Failed,
            block_id: None,
            error: Some(e.to_string()),
        },
    }
}

fn storage_failure(message: &str) -> VerificationResult {
    VerificationResult {
        is_valid: false,
        reason: bhoomi_ledger::integrity::VerificationReason::NotOnChain,
        broken_at_index: None,
        live_hash: None,
        chain_hash: None,
        total_entries: 0,
        message: message.to_string(),
    }
}

//! Bulk sync engine: reconcile the ledger against the system-of-record.
//!
//! `RecordSource` lists candidate rows from the external collections;
//! `SyncEngine` backfills missing chain entries and re-verifies existing ones
//! with a bounded worker pool. Per-row failures are collected into a report,
//! never thrown, so one bad row cannot abort a batch.

pub mod engine;
pub mod source;

pub use engine::{SyncEngine, SyncOutcome, SyncReport, SyncStatus, VerifyOutcome};
pub use source::{canonicalize_record, HttpRecordSource, RecordSource, SyncCandidate};

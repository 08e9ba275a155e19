//! Error types shared across all Bhoomi crates.

/// Errors that can occur across the Bhoomi ledger runtime.
///
/// Ingestion failures (`InvalidEntryInput`) are rejected before any write.
/// `ChainViolation` is the store's compare-and-append conflict; the ledger
/// service retries it a bounded number of times before surfacing
/// `ConcurrentModification` to the caller.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid entry input: {0}")]
    InvalidEntryInput(String),

    #[error("duplicate block id: {0}")]
    DuplicateBlockId(String),

    #[error("chain violation for {row_key}: expected previous hash {expected}, found {found}")]
    ChainViolation {
        row_key: String,
        expected: String,
        found: String,
    },

    #[error("concurrent modification on {0}: append retries exhausted")]
    ConcurrentModification(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ChainViolation { .. }
                | LedgerError::ConcurrentModification(_)
                | LedgerError::SourceUnavailable(_)
        )
    }
}

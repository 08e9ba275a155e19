//! Aggregate statistics for the dashboard.
//!
//! Validity counts require walking every chain, so recomputation cost scales
//! with entry count; the HTTP layer treats the result as a snapshot rather
//! than recomputing per widget.

use serde::{Deserialize, Serialize};

use bhoomi_types::LedgerError;

use crate::integrity::verify_chain;
use crate::service::LedgerService;

/// Summary metrics over all entries, optionally scoped to one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_entries: usize,
    pub total_keys: usize,
    pub valid_entries: usize,
    pub invalid_entries: usize,
    /// Row keys whose chain failed verification.
    pub compromised_keys: usize,
    pub event_type_distribution: Vec<(String, usize)>,
    pub officer_activity: Vec<(String, usize)>,
    pub earliest_entry: Option<String>,
    pub latest_entry: Option<String>,
}

impl LedgerService {
    /// Compute aggregate statistics by scanning entries and verifying each
    /// key's chain.
    pub fn compute_stats(&self, project_id: Option<&str>) -> Result<LedgerStats, LedgerError> {
        let (total_entries, event_type_distribution, officer_activity, keys, time_range) = {
            let store = self.store()?;
            (
                store.count(project_id)?,
                store.count_by_event_type(project_id)?,
                store.count_by_officer(project_id)?,
                store.distinct_row_keys(project_id)?,
                store.time_range()?,
            )
        };

        let mut valid_entries = 0;
        let mut invalid_entries = 0;
        let mut compromised_keys = 0;
        for key in &keys {
            let chain = self.chain(key)?;
            let result = verify_chain(&chain);
            if result.is_valid {
                valid_entries += chain.len();
            } else {
                compromised_keys += 1;
                // Entries before the break still verified; the rest did not.
                let broken_at = result.broken_at_index.unwrap_or(0);
                valid_entries += broken_at;
                invalid_entries += chain.len() - broken_at;
            }
        }

        Ok(LedgerStats {
            total_entries,
            total_keys: keys.len(),
            valid_entries,
            invalid_entries,
            compromised_keys,
            event_type_distribution,
            officer_activity,
            earliest_entry: time_range.0,
            latest_entry: time_range.1,
        })
    }
}

//! Timeline queries derived from stored chains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bhoomi_types::{EventType, LedgerError, RowKey};

use crate::entry::LedgerEntry;
use crate::service::LedgerService;

/// One row of a key's event timeline, in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub block_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub officer_id: String,
    pub remarks: Option<String>,
    pub current_hash: String,
}

impl From<&LedgerEntry> for TimelineEvent {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            block_id: entry.block_id.clone(),
            event_type: entry.event_type,
            timestamp: entry.timestamp,
            officer_id: entry.officer_id.clone(),
            remarks: entry.remarks.clone(),
            current_hash: entry.current_hash.clone(),
        }
    }
}

impl LedgerService {
    /// Event timeline for one row key, oldest first.
    ///
    /// `offset`/`limit` page through long-lived rows; a fresh call with the
    /// next offset resumes where the previous one stopped.
    pub fn timeline(
        &self,
        row_key: &RowKey,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TimelineEvent>, LedgerError> {
        let chain = self.chain(row_key)?;
        Ok(page(&chain, offset, limit))
    }

    /// Event timeline across every row key under a survey number.
    pub fn timeline_for_survey(
        &self,
        survey: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TimelineEvent>, LedgerError> {
        let entries = self.entries_for_survey(survey)?;
        Ok(page(&entries, offset, limit))
    }
}

fn page(entries: &[LedgerEntry], offset: usize, limit: usize) -> Vec<TimelineEvent> {
    entries
        .iter()
        .skip(offset)
        .take(limit)
        .map(TimelineEvent::from)
        .collect()
}

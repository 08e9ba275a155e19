//! EntryStore: SQLite-backed append-only collection of ledger entries.
//!
//! The store is the only mutable shared resource in the system. `append` is a
//! compare-and-append: inside one transaction it re-reads the chain tail for
//! the entry's row key and rejects the write if the supplied `previous_hash`
//! is stale, so two concurrent appends to the same key can never both succeed
//! against the same tail.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use bhoomi_types::{EventPayload, EventType, LedgerError, RowKey};

use crate::entry::LedgerEntry;
use crate::hash::{genesis_hash, HashScheme};

/// One page of a project scan, restartable via `next_token`.
#[derive(Debug, Clone)]
pub struct ScanPage {
    pub entries: Vec<LedgerEntry>,
    /// Pass back as `after` to resume the scan; None when exhausted.
    pub next_token: Option<i64>,
}

/// An append-only, hash-chained entry store backed by SQLite.
pub struct EntryStore {
    conn: Connection,
}

impl EntryStore {
    /// Open (or create) the ledger database at the given path.
    ///
    /// Enables WAL mode and creates the `ledger_entries` table and its
    /// indexes if they do not exist.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)
            .map_err(|e| LedgerError::Storage(format!("failed to open database: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| LedgerError::Storage(format!("failed to set WAL mode: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                block_id TEXT NOT NULL UNIQUE,
                row_key TEXT NOT NULL,
                project_id TEXT NOT NULL,
                survey_number TEXT,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                current_hash TEXT NOT NULL,
                hash_version TEXT NOT NULL,
                nonce INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                officer_id TEXT NOT NULL,
                remarks TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_row_key ON ledger_entries(row_key);
            CREATE INDEX IF NOT EXISTS idx_project_id ON ledger_entries(project_id);
            CREATE INDEX IF NOT EXISTS idx_survey_number ON ledger_entries(survey_number);
            CREATE INDEX IF NOT EXISTS idx_event_type ON ledger_entries(event_type);
            CREATE INDEX IF NOT EXISTS idx_timestamp ON ledger_entries(timestamp);",
        )
        .map_err(|e| LedgerError::Storage(format!("failed to create schema: {e}")))?;

        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM ledger_entries", [], |row| row.get(0))
            .map_err(|e| LedgerError::Storage(format!("failed to count entries: {e}")))?;

        info!(path = %path.display(), entries = total, "entry store opened");

        Ok(Self { conn })
    }

    /// Append a new entry, enforcing block id uniqueness and chain linkage.
    ///
    /// The tail check and insert run in one transaction. Returns
    /// `DuplicateBlockId` if the block id already exists and `ChainViolation`
    /// if `previous_hash` does not match the current tail for the row key
    /// (genesis hash for an empty chain).
    pub fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| LedgerError::Storage(format!("failed to begin transaction: {e}")))?;

        let duplicate: Option<String> = tx
            .query_row(
                "SELECT block_id FROM ledger_entries WHERE block_id = ?1",
                params![entry.block_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LedgerError::Storage(format!("block id lookup failed: {e}")))?;
        if duplicate.is_some() {
            return Err(LedgerError::DuplicateBlockId(entry.block_id.clone()));
        }

        let canonical_key = entry.row_key.canonical();
        let tail: Option<String> = tx
            .query_row(
                "SELECT current_hash FROM ledger_entries WHERE row_key = ?1
                 ORDER BY id DESC LIMIT 1",
                params![canonical_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LedgerError::Storage(format!("tail lookup failed: {e}")))?;

        let expected = tail.unwrap_or_else(|| genesis_hash(&entry.row_key));
        if entry.previous_hash != expected {
            return Err(LedgerError::ChainViolation {
                row_key: canonical_key,
                expected,
                found: entry.previous_hash.clone(),
            });
        }

        let payload_json = serde_json::to_string(&entry.payload)
            .map_err(|e| LedgerError::Storage(format!("payload serialization failed: {e}")))?;

        tx.execute(
            "INSERT INTO ledger_entries
                 (block_id, row_key, project_id, survey_number, event_type, payload,
                  previous_hash, current_hash, hash_version, nonce, timestamp, officer_id, remarks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                entry.block_id,
                canonical_key,
                entry.row_key.project_id,
                entry.survey_number,
                entry.event_type.wire_name(),
                payload_json,
                entry.previous_hash,
                entry.current_hash,
                entry.hash_version.as_str(),
                entry.nonce as i64,
                entry.timestamp.to_rfc3339(),
                entry.officer_id,
                entry.remarks,
            ],
        )
        .map_err(|e| LedgerError::Storage(format!("failed to insert entry: {e}")))?;

        tx.commit()
            .map_err(|e| LedgerError::Storage(format!("failed to commit append: {e}")))
    }

    /// Full chain for one row key, oldest first. Empty if the key is unknown.
    pub fn chain(&self, row_key: &RowKey) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.select_entries(
            "WHERE row_key = ?1 ORDER BY id ASC",
            params![row_key.canonical()],
        )
    }

    /// Most recent entry for one row key.
    pub fn latest(&self, row_key: &RowKey) -> Result<Option<LedgerEntry>, LedgerError> {
        let mut entries = self.select_entries(
            "WHERE row_key = ?1 ORDER BY id DESC LIMIT 1",
            params![row_key.canonical()],
        )?;
        Ok(entries.pop())
    }

    pub fn exists_for_key(&self, row_key: &RowKey) -> Result<bool, LedgerError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM ledger_entries WHERE row_key = ?1 LIMIT 1",
                params![row_key.canonical()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LedgerError::Storage(format!("exists lookup failed: {e}")))?;
        Ok(found.is_some())
    }

    pub fn find_by_block_id(&self, block_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let mut entries =
            self.select_entries("WHERE block_id = ?1 LIMIT 1", params![block_id])?;
        Ok(entries.pop())
    }

    /// All entries sharing an effective survey number, oldest first.
    ///
    /// May span multiple row keys (one survey can hold several serials);
    /// callers group by row key before per-chain verification.
    pub fn entries_for_survey(&self, survey: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.select_entries(
            "WHERE survey_number = ?1 ORDER BY id ASC",
            params![survey],
        )
    }

    /// Most recent entry touching the given survey number.
    pub fn latest_for_survey(&self, survey: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let mut entries = self.select_entries(
            "WHERE survey_number = ?1 ORDER BY id DESC LIMIT 1",
            params![survey],
        )?;
        Ok(entries.pop())
    }

    /// The most recent `limit` entries across all keys, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.select_entries("ORDER BY id DESC LIMIT ?1", params![limit as i64])
    }

    /// One page of a project's entries in insertion order.
    ///
    /// Keyset pagination: pass the returned `next_token` back as `after` to
    /// resume. The token is stable across appends since row ids only grow.
    pub fn scan_by_project(
        &self,
        project_id: &str,
        limit: usize,
        after: Option<i64>,
    ) -> Result<ScanPage, LedgerError> {
        let after = after.unwrap_or(0);
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COLUMNS}, id FROM ledger_entries
                 WHERE project_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
            ))
            .map_err(|e| LedgerError::Storage(format!("scan prepare failed: {e}")))?;

        let rows = stmt
            .query_map(params![project_id, after, limit as i64], |row| {
                let entry = row_to_entry(row)?;
                let id: i64 = row.get(13)?;
                Ok((entry, id))
            })
            .map_err(|e| LedgerError::Storage(format!("scan query failed: {e}")))?;

        let mut entries = Vec::new();
        let mut last_id = None;
        for row in rows {
            let (entry, id) =
                row.map_err(|e| LedgerError::Storage(format!("scan read failed: {e}")))?;
            entries.push(entry);
            last_id = Some(id);
        }

        let next_token = if entries.len() == limit { last_id } else { None };
        Ok(ScanPage { entries, next_token })
    }

    /// Total number of entries, optionally scoped to one project.
    pub fn count(&self, project_id: Option<&str>) -> Result<usize, LedgerError> {
        let count: i64 = match project_id {
            Some(p) => self
                .conn
                .query_row(
                    "SELECT COUNT(*) FROM ledger_entries WHERE project_id = ?1",
                    params![p],
                    |row| row.get(0),
                )
                .map_err(|e| LedgerError::Storage(format!("count failed: {e}")))?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM ledger_entries", [], |row| row.get(0))
                .map_err(|e| LedgerError::Storage(format!("count failed: {e}")))?,
        };
        Ok(count as usize)
    }

    /// Entry counts grouped by event type, descending.
    pub fn count_by_event_type(
        &self,
        project_id: Option<&str>,
    ) -> Result<Vec<(String, usize)>, LedgerError> {
        self.count_grouped_by("event_type", project_id)
    }

    /// Entry counts grouped by officer, descending.
    pub fn count_by_officer(
        &self,
        project_id: Option<&str>,
    ) -> Result<Vec<(String, usize)>, LedgerError> {
        self.count_grouped_by("officer_id", project_id)
    }

    /// Every distinct row key, optionally scoped to one project.
    pub fn distinct_row_keys(
        &self,
        project_id: Option<&str>,
    ) -> Result<Vec<RowKey>, LedgerError> {
        let (sql, bind): (&str, Vec<&str>) = match project_id {
            Some(p) => (
                "SELECT DISTINCT row_key FROM ledger_entries WHERE project_id = ?1",
                vec![p],
            ),
            None => ("SELECT DISTINCT row_key FROM ledger_entries", vec![]),
        };
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| LedgerError::Storage(format!("distinct keys prepare failed: {e}")))?;

        let rows = stmt
            .query_map(rusqlite::params_from_iter(bind), |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| LedgerError::Storage(format!("distinct keys query failed: {e}")))?;

        let mut keys = Vec::new();
        for raw in rows {
            let raw =
                raw.map_err(|e| LedgerError::Storage(format!("distinct keys read failed: {e}")))?;
            keys.push(RowKey::parse(&raw)?);
        }
        Ok(keys)
    }

    /// Earliest and latest entry timestamps, if any entries exist.
    pub fn time_range(&self) -> Result<(Option<String>, Option<String>), LedgerError> {
        let earliest: Option<String> = self
            .conn
            .query_row(
                "SELECT timestamp FROM ledger_entries ORDER BY id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LedgerError::Storage(format!("time range query failed: {e}")))?;
        let latest: Option<String> = self
            .conn
            .query_row(
                "SELECT timestamp FROM ledger_entries ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LedgerError::Storage(format!("time range query failed: {e}")))?;
        Ok((earliest, latest))
    }

    fn select_entries(
        &self,
        clause: &str,
        bind: impl rusqlite::Params,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM ledger_entries {clause}"))
            .map_err(|e| LedgerError::Storage(format!("query prepare failed: {e}")))?;

        let rows = stmt
            .query_map(bind, row_to_entry)
            .map_err(|e| LedgerError::Storage(format!("query failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Storage(format!("query read failed: {e}")))
    }

    fn count_grouped_by(
        &self,
        column: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<(String, usize)>, LedgerError> {
        let sql = match project_id {
            Some(_) => format!(
                "SELECT {column}, COUNT(*) FROM ledger_entries WHERE project_id = ?1
                 GROUP BY {column} ORDER BY COUNT(*) DESC"
            ),
            None => format!(
                "SELECT {column}, COUNT(*) FROM ledger_entries
                 GROUP BY {column} ORDER BY COUNT(*) DESC"
            ),
        };
        let bind: Vec<&str> = project_id.into_iter().collect();

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| LedgerError::Storage(format!("group-by prepare failed: {e}")))?;

        let rows = stmt
            .query_map(rusqlite::params_from_iter(bind), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })
            .map_err(|e| LedgerError::Storage(format!("group-by query failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::Storage(format!("group-by read failed: {e}")))
    }

    /// Read access to the underlying connection, for in-crate tests.
    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

const COLUMNS: &str = "block_id, row_key, project_id, survey_number, event_type, payload, \
                       previous_hash, current_hash, hash_version, nonce, timestamp, officer_id, remarks";

/// Map a SQLite row (in `COLUMNS` order) to a LedgerEntry.
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let row_key = RowKey::parse(&row.get::<_, String>(1)?).map_err(|e| conversion(1, e))?;
    let event_type =
        EventType::from_wire_name(&row.get::<_, String>(4)?).map_err(|e| conversion(4, e))?;
    let payload: EventPayload = serde_json::from_str(&row.get::<_, String>(5)?)
        .map_err(|e| conversion(5, LedgerError::Storage(e.to_string())))?;
    let hash_version =
        HashScheme::from_str(&row.get::<_, String>(8)?).map_err(|e| conversion(8, e))?;
    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&row.get::<_, String>(10)?)
        .map_err(|e| conversion(10, LedgerError::Storage(e.to_string())))?
        .into();

    Ok(LedgerEntry {
        block_id: row.get(0)?,
        row_key,
        survey_number: row.get(3)?,
        event_type,
        payload,
        previous_hash: row.get(6)?,
        current_hash: row.get(7)?,
        hash_version,
        nonce: row.get::<_, i64>(9)? as u64,
        timestamp,
        officer_id: row.get(11)?,
        remarks: row.get(12)?,
    })
}

fn conversion(idx: usize, err: LedgerError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

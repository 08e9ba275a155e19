//! Core types shared across all Bhoomi crates.
//!
//! Defines row keys, lifecycle events, payloads, configuration, and error
//! types used by the ledger core, the bulk sync engine, and the HTTP server.

pub mod config;
pub mod error;
pub mod event;
pub mod row_key;

pub use config::{BhoomiConfig, CONFIG_FILENAME, LEDGER_FILENAME};
pub use error::LedgerError;
pub use event::{EventPayload, EventType};
pub use row_key::RowKey;

//! HTTP facade for the Bhoomi integrity ledger.
//!
//! Preserves the `/blockchain/*` paths and `{success, message, data}`
//! envelope the dashboards already consume, mapped onto the ledger service,
//! sync engine, and query layer.

pub mod dto;
pub mod http;

pub use http::{app, serve, AppState};

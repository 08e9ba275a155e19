//! Server configuration with layered loading.
//!
//! Values merge in priority order: built-in defaults, then an optional TOML
//! file, then `BHOOMI_*` environment variables. Later sources override
//! earlier ones for any field that is present.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// Default config file name looked up in the working directory.
pub const CONFIG_FILENAME: &str = "bhoomi.toml";

/// Default SQLite ledger file name.
pub const LEDGER_FILENAME: &str = "bhoomi-ledger.db";

/// Maximum config file size in bytes. Larger files are rejected.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Runtime configuration for the Bhoomi ledger server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BhoomiConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// Path to the SQLite ledger database.
    pub db_path: PathBuf,
    /// Bearer token required on mutating routes. Empty disables auth.
    pub api_key: String,
    /// Label reported by the status endpoint.
    pub network_name: String,
    /// Vestigial chain id kept for dashboard compatibility.
    pub chain_id: u64,
    /// Base URL of the system-of-record API used by bulk sync.
    /// None disables source-backed listing and sync.
    pub source_base_url: Option<String>,
    /// Per-request timeout for source-of-truth fetches, in seconds.
    pub source_timeout_secs: u64,
    /// Worker count for bulk sync and bulk verification.
    pub sync_concurrency: usize,
}

impl Default for BhoomiConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7845".to_string(),
            db_path: PathBuf::from(LEDGER_FILENAME),
            api_key: String::new(),
            network_name: "bhoomi-ledger".to_string(),
            chain_id: 1,
            source_base_url: None,
            source_timeout_secs: 5,
            sync_concurrency: default_sync_concurrency(),
        }
    }
}

/// Worker count matching available parallelism, capped to the 2..=8 pool
/// bounds the sync engine enforces.
fn default_sync_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(2, 8)
}

impl BhoomiConfig {
    /// Load configuration from an optional TOML file plus the environment.
    ///
    /// A missing file at the default location is not an error; an explicitly
    /// supplied path that does not exist is.
    pub fn load(path: Option<&Path>) -> Result<Self, LedgerError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new(CONFIG_FILENAME);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, LedgerError> {
        let meta = std::fs::metadata(path)
            .map_err(|e| LedgerError::Config(format!("cannot read {}: {e}", path.display())))?;
        if meta.len() > MAX_CONFIG_FILE_SIZE {
            return Err(LedgerError::Config(format!(
                "config file {} exceeds {MAX_CONFIG_FILE_SIZE} bytes",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| LedgerError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Apply `BHOOMI_*` environment variable overrides.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("BHOOMI_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Ok(v) = std::env::var("BHOOMI_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BHOOMI_API_KEY") {
            self.api_key = v;
        }
        if let Ok(v) = std::env::var("BHOOMI_SOURCE_BASE_URL") {
            self.source_base_url = if v.is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = std::env::var("BHOOMI_SOURCE_TIMEOUT_SECS") {
            if let Ok(parsed) = v.parse() {
                self.source_timeout_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var("BHOOMI_SYNC_CONCURRENCY") {
            if let Ok(parsed) = v.parse() {
                self.sync_concurrency = parsed;
            }
        }
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.listen_addr.trim().is_empty() {
            return Err(LedgerError::Config("listen_addr must not be empty".to_string()));
        }
        if self.source_timeout_secs == 0 {
            return Err(LedgerError::Config(
                "source_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.sync_concurrency == 0 {
            return Err(LedgerError::Config(
                "sync_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

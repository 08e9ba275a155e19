use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bhoomi_ledger::LedgerService;
use bhoomi_sync::{HttpRecordSource, RecordSource};
use bhoomi_types::BhoomiConfig;

/// Bhoomi -- append-only integrity ledger for land-acquisition records.
#[derive(Parser, Debug)]
#[command(name = "bhoomi-server", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to ./bhoomi.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long)]
    listen: Option<String>,

    /// Override the ledger database path
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = BhoomiConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let service = Arc::new(LedgerService::open(&config.db_path)?);

    let source: Option<Arc<dyn RecordSource>> = match &config.source_base_url {
        Some(url) => {
            info!(url = %url, "source-of-truth listing enabled");
            Some(Arc::new(HttpRecordSource::new(
                url,
                Duration::from_secs(config.source_timeout_secs),
            )?))
        }
        None => {
            info!("no source base URL configured, bulk sync disabled");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    bhoomi_server::serve(config, service, source, shutdown_rx).await?;
    info!("server stopped");
    Ok(())
}

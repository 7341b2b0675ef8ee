//! Relayer binary: configuration from the environment, then run until Ctrl-C or a fatal error.

use anyhow::{Context, Result};
use relayer::{
    BlockRepository, EventRepository, FileStore, MemoryStore, RelayerConfig, Service, ServiceOpts,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relayer=info")),
        )
        .init();

    let config = RelayerConfig::from_env().context("read configuration")?;
    let (event_repository, block_repository): (Arc<dyn EventRepository>, Arc<dyn BlockRepository>) =
        match &config.store_path {
            Some(path) => {
                let store = Arc::new(FileStore::open(path).await.context("open store")?);
                (store.clone(), store)
            }
            None => {
                tracing::warn!("STORE_PATH not set, events and cursor are kept in memory only");
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
        };

    let service = Service::new(ServiceOpts {
        config,
        event_repository: Some(event_repository),
        block_repository: Some(block_repository),
    })
    .context("configure relayer")?;

    let cancel = CancellationToken::new();
    let mut handle = service.start(cancel.clone());

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!(reason = %e, "failed to listen for Ctrl-C");
            }
            tracing::info!("shutting down");
        }
        Some(err) = handle.errors.recv() => {
            tracing::error!(reason = %err, "fatal service error, shutting down");
        }
    }
    cancel.cancel();

    for failure in handle.join().await {
        tracing::error!(reason = %failure, "task ended abnormally");
    }
    tracing::info!("relayer stopped");
    Ok(())
}

//! Service wiring: validates configuration, builds the chain components, and
//! starts the indexer and the processor pool under one cancellation token.

use crate::chain::{ChainClient, SourceChain};
use crate::config::RelayerConfig;
use crate::destination::{DestinationBridge, DestinationChain, HeaderSyncContract, HeaderSyncReader};
use crate::error::{ConfigError, ServiceError};
use crate::indexer::{Indexer, IndexerConfig};
use crate::processor::{Processor, ProcessorConfig, ProcessorPool};
use crate::proof::{ProofBuilder, Prover};
use crate::repository::{BlockRepository, EventRepository};
use crate::rpc::RpcClient;
use crate::signer::RelayerKey;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Non-blocking sender side of the service error stream.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ServiceError>,
}

impl ErrorReporter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServiceError>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue `err` for the supervisor. Dropped with a warning when the stream is full.
    pub fn report(&self, err: ServiceError) {
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) => {
                tracing::warn!(reason = %err, "error stream full, dropping error");
            }
            Err(TrySendError::Closed(err)) => {
                tracing::debug!(reason = %err, "error stream closed");
            }
        }
    }
}

/// Inputs to [Service::new]. Repositories are required.
#[derive(Default)]
pub struct ServiceOpts {
    pub config: RelayerConfig,
    pub event_repository: Option<Arc<dyn EventRepository>>,
    pub block_repository: Option<Arc<dyn BlockRepository>>,
}

/// Chain-facing collaborators of the pipelines.
#[derive(Clone)]
pub struct Components {
    pub source: Arc<dyn ChainClient>,
    pub header_sync: Arc<dyn HeaderSyncReader>,
    pub bridge: Arc<dyn DestinationBridge>,
    pub prover: Arc<dyn ProofBuilder>,
}

pub struct Service {
    config: RelayerConfig,
    events: Arc<dyn EventRepository>,
    blocks: Arc<dyn BlockRepository>,
    components: Components,
}

/// Running service: both pipelines plus the error stream.
pub struct ServiceHandle {
    pub tasks: JoinSet<()>,
    pub errors: mpsc::Receiver<ServiceError>,
}

impl ServiceHandle {
    /// Wait for every task. Panics are returned as [ServiceError::TaskPanicked].
    pub async fn join(mut self) -> Vec<ServiceError> {
        let mut failures = Vec::new();
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                failures.push(ServiceError::TaskPanicked(e.to_string()));
            }
        }
        failures
    }
}

impl Service {
    /// Validate `opts` and build JSON-RPC backed components. Spawns nothing.
    pub fn new(opts: ServiceOpts) -> Result<Self, ConfigError> {
        let events = opts.event_repository.ok_or(ConfigError::NoEventRepository)?;
        let blocks = opts.block_repository.ok_or(ConfigError::NoBlockRepository)?;
        let config = opts.config;
        config.validate()?;
        let key = RelayerKey::from_hex(&config.ecdsa_key)?;

        let src_rpc = Arc::new(
            RpcClient::new(config.src_rpc_url.clone(), config.rpc_timeout).map_err(|e| ConfigError::Invalid {
                var: "SRC_RPC_URL",
                reason: e.to_string(),
            })?,
        );
        let dest_rpc = Arc::new(
            RpcClient::new(config.dest_rpc_url.clone(), config.rpc_timeout).map_err(|e| ConfigError::Invalid {
                var: "DEST_RPC_URL",
                reason: e.to_string(),
            })?,
        );

        let source = Arc::new(SourceChain::new(src_rpc, config.src_ws_url.clone()));
        let header_sync = Arc::new(HeaderSyncContract::new(
            Arc::clone(&dest_rpc),
            config.dest_header_sync_address,
            source.clone(),
        ));
        let bridge = Arc::new(DestinationChain::new(
            dest_rpc,
            config.dest_bridge_address,
            key,
            config.dest_start_block,
            config.block_batch_size,
        ));
        let prover = Arc::new(Prover::new(source.clone(), config.src_bridge_address));
        tracing::info!(relayer = %bridge.relayer_address(), "relayer key loaded");

        Ok(Self::with_components(
            config,
            events,
            blocks,
            Components {
                source,
                header_sync,
                bridge,
                prover,
            },
        ))
    }

    /// Build with caller-supplied components. Configuration is taken as is.
    pub fn with_components(
        config: RelayerConfig,
        events: Arc<dyn EventRepository>,
        blocks: Arc<dyn BlockRepository>,
        components: Components,
    ) -> Self {
        Self {
            config,
            events,
            blocks,
            components,
        }
    }

    pub fn config(&self) -> &RelayerConfig {
        &self.config
    }

    /// Spawn the indexer and the processor pool. Both stop when `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> ServiceHandle {
        let (reporter, errors) = ErrorReporter::channel(self.config.error_channel_capacity);
        let mut tasks = JoinSet::new();

        let indexer = Indexer::new(
            Arc::clone(&self.components.source),
            Arc::clone(&self.events),
            Arc::clone(&self.blocks),
            IndexerConfig::from(&self.config),
            reporter.clone(),
        );
        let indexer_cancel = cancel.clone();
        tasks.spawn(async move { indexer.run(indexer_cancel).await });

        let processor = Arc::new(Processor::new(
            Arc::clone(&self.events),
            Arc::clone(&self.components.header_sync),
            Arc::clone(&self.components.bridge),
            Arc::clone(&self.components.prover),
            ProcessorConfig::from(&self.config),
        ));
        let pool = ProcessorPool::new(processor, Arc::clone(&self.events), reporter);
        tasks.spawn(async move { pool.run(cancel).await });

        tracing::info!(
            start_block = self.config.start_block,
            confirmations = self.config.confirmations,
            workers = self.config.num_workers,
            "relayer started"
        );
        ServiceHandle { tasks, errors }
    }
}

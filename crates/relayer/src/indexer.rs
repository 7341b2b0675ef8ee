//! Indexer: ingests `MessageSent` logs from the source chain into the event repository.
//!
//! Follows new heads over WebSocket when available and polls the latest header
//! otherwise. Each head triggers a catch-up from the persisted cursor to the tip
//! in batches of at most `block_batch_size` blocks. Batches are fetched
//! concurrently but committed strictly in order, events first and cursor last,
//! so the cursor never runs ahead of durably saved events.

use crate::abi::{decode_message_sent, message_sent_topic};
use crate::backoff::{sleep_or_cancel, Backoff, RetryPolicy};
use crate::chain::ChainClient;
use crate::config::{ReconnectionConfig, RelayerConfig};
use crate::error::{RepositoryError, RpcError, ServiceError};
use crate::event::Event;
use crate::repository::{BlockRepository, EventRepository};
use crate::service::ErrorReporter;
use crate::types::LogFilter;
use alloy::primitives::Address;
use futures_util::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Source bridge contract.
    pub bridge: Address,
    /// First block to index when no cursor is persisted.
    pub start_block: u64,
    /// Max block range per `eth_getLogs` request.
    pub block_batch_size: u64,
    /// Batches fetched concurrently.
    pub workers: usize,
    /// Blocks kept between the tip and the highest indexed block.
    pub ingest_confirmations: u64,
    /// Head polling interval when no subscription is available.
    pub poll_interval: Duration,
    pub reconnection: ReconnectionConfig,
}

impl From<&RelayerConfig> for IndexerConfig {
    fn from(c: &RelayerConfig) -> Self {
        Self {
            bridge: c.src_bridge_address,
            start_block: c.start_block,
            block_batch_size: c.block_batch_size.max(1),
            workers: c.indexer_workers.max(1),
            ingest_confirmations: c.ingest_confirmations,
            poll_interval: c.poll_interval,
            reconnection: c.reconnection.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum IndexerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("head stream ended")]
    StreamEnded,
    #[error("source chain has no latest header")]
    NoLatestHeader,
}

pub struct Indexer {
    chain: Arc<dyn ChainClient>,
    events: Arc<dyn EventRepository>,
    blocks: Arc<dyn BlockRepository>,
    config: IndexerConfig,
    fetch_retry: RetryPolicy,
    errors: ErrorReporter,
}

impl Indexer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        events: Arc<dyn EventRepository>,
        blocks: Arc<dyn BlockRepository>,
        config: IndexerConfig,
        errors: ErrorReporter,
    ) -> Self {
        let fetch_retry = RetryPolicy::new(3, Backoff::from(&config.reconnection));
        Self {
            chain,
            events,
            blocks,
            config,
            fetch_retry,
            errors,
        }
    }

    /// Run until `cancel` fires. Failures back off and resume from the persisted cursor.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = Backoff::from(&self.config.reconnection);
        while !cancel.is_cancelled() {
            match self.run_once(&cancel, &mut backoff).await {
                Ok(()) => {}
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(reason = %e, ?delay, "indexer failed, reconnecting...");
                    if let IndexerError::Repository(e) = e {
                        self.errors.report(ServiceError::IndexerRepository(e));
                    }
                    if !sleep_or_cancel(delay, &cancel).await {
                        break;
                    }
                }
            }
        }
        tracing::info!("indexer stopped");
    }

    /// One subscription round: catch up, then follow heads until an error or cancel.
    async fn run_once(&self, cancel: &CancellationToken, backoff: &mut Backoff) -> Result<(), IndexerError> {
        let chain_id = self.chain.chain_id().await?;
        let mut next = self.next_block().await?;
        let tip = self.latest_block_number().await?;
        next = self.catch_up(chain_id, next, tip, cancel).await?;
        backoff.reset();

        match self.chain.subscribe_heads().await {
            Ok(mut heads) => {
                tracing::info!(chain_id, from = next, "following new heads");
                loop {
                    let head = tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        head = heads.next() => head,
                    };
                    match head {
                        Some(Ok(tip)) => {
                            next = self.catch_up(chain_id, next, tip, cancel).await?;
                            backoff.reset();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(IndexerError::StreamEnded),
                    }
                }
            }
            Err(RpcError::Unsupported(reason)) => {
                tracing::info!(chain_id, from = next, %reason, "head subscription unavailable, polling");
                loop {
                    if !sleep_or_cancel(self.config.poll_interval, cancel).await {
                        return Ok(());
                    }
                    let tip = self.latest_block_number().await?;
                    next = self.catch_up(chain_id, next, tip, cancel).await?;
                    backoff.reset();
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn next_block(&self) -> Result<u64, IndexerError> {
        Ok(match self.blocks.latest_block().await? {
            Some(cursor) => cursor.saturating_add(1),
            None => self.config.start_block,
        })
    }

    async fn latest_block_number(&self) -> Result<u64, IndexerError> {
        self.chain
            .header_by_number(None)
            .await?
            .map(|h| h.number)
            .ok_or(IndexerError::NoLatestHeader)
    }

    /// Index `[next, tip - ingest_confirmations]`. Returns the new `next`.
    async fn catch_up(
        &self,
        chain_id: u64,
        next: u64,
        tip: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, IndexerError> {
        let target = tip.saturating_sub(self.config.ingest_confirmations);
        if next > target {
            return Ok(next);
        }
        tracing::debug!(from = next, to = target, "catching up");
        let ranges = batch_ranges(next, target, self.config.block_batch_size);
        let mut batches = stream::iter(ranges)
            .map(|(from, to)| async move {
                self.fetch_batch(chain_id, from, to, cancel)
                    .await
                    .map(|events| (from, to, events))
            })
            .buffered(self.config.workers);

        let mut next = next;
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = batches.next() => batch,
            };
            let Some(batch) = batch else { break };
            let (from, to, events) = batch?;
            self.commit(from, to, events).await?;
            next = to + 1;
        }
        Ok(next)
    }

    async fn fetch_batch(
        &self,
        chain_id: u64,
        from: u64,
        to: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>, IndexerError> {
        let filter = LogFilter {
            address: Some(self.config.bridge),
            topics: vec![Some(message_sent_topic())],
            from_block: Some(from),
            to_block: Some(to),
        };
        let logs = self
            .fetch_retry
            .retry(cancel, || self.chain.logs(&filter))
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                tracing::debug!(tx = %log.tx_hash, block = log.block_number, "skipping removed log");
                continue;
            }
            match decode_message_sent(&log, chain_id) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(
                    reason = %e,
                    tx = %log.tx_hash,
                    block = log.block_number,
                    "skipping undecodable MessageSent log"
                ),
            }
        }
        events.sort_by_key(|e| (e.block_number, e.id.log_index));
        Ok(events)
    }

    /// Save events, then advance the cursor to `to`.
    async fn commit(&self, from: u64, to: u64, events: Vec<Event>) -> Result<(), IndexerError> {
        let mut saved = 0usize;
        for event in events {
            let id = event.id;
            let block = event.block_number;
            match self.events.save(event).await {
                Ok(()) => {
                    saved += 1;
                    tracing::info!(%id, block, "ingested bridge event");
                }
                Err(RepositoryError::Duplicate(_)) => {
                    tracing::debug!(%id, "event already ingested");
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.blocks.save_latest_block(to).await?;
        tracing::debug!(from, to, saved, "batch committed");
        Ok(())
    }
}

/// Split `[from, to]` into inclusive ranges of at most `size` blocks.
pub fn batch_ranges(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(size - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_cover_interval_without_gaps() {
        assert_eq!(batch_ranges(100, 105, 100), vec![(100, 105)]);
        assert_eq!(
            batch_ranges(100, 105, 2),
            vec![(100, 101), (102, 103), (104, 105)]
        );
        assert_eq!(batch_ranges(100, 104, 2), vec![(100, 101), (102, 103), (104, 104)]);
        assert!(batch_ranges(106, 105, 10).is_empty());
        assert_eq!(batch_ranges(7, 7, 0), vec![(7, 7)]);
    }

    #[test]
    fn config_from_relayer_config() {
        let rc = RelayerConfig {
            start_block: 100,
            block_batch_size: 6,
            indexer_workers: 2,
            ..RelayerConfig::default()
        };
        let c = IndexerConfig::from(&rc);
        assert_eq!(c.start_block, 100);
        assert_eq!(c.block_batch_size, 6);
        assert_eq!(c.workers, 2);
        assert_eq!(c.ingest_confirmations, 0);
    }
}

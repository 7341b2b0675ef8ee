//! Destination-chain side: the header-sync reader and the bridge (status, delivery lookup, submission).

use crate::abi::{
    decode_latest_synced_header, decode_message_status, decode_message_status_changed,
    get_latest_synced_header_calldata, get_message_status_calldata, message_status_changed_topic,
    process_message_calldata, MessageStatus,
};
use crate::chain::ChainClient;
use crate::error::{RpcError, SubmitError};
use crate::event::BridgeMessage;
use crate::indexer::batch_ranges;
use crate::proof::Proof;
use crate::rpc::{BlockTag, RpcClient};
use crate::signer::{LegacyTx, RelayerKey};
use crate::types::{Log, LogFilter, Receipt};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Latest source header the destination has synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncedHeader {
    pub number: u64,
    pub hash: B256,
}

#[async_trait]
pub trait HeaderSyncReader: Send + Sync {
    /// `None` until the destination has synced any header.
    async fn latest_synced_header(&self) -> Result<Option<SyncedHeader>, RpcError>;
}

/// Reads `getLatestSyncedHeader()` and resolves the hash to a number on the source chain.
pub struct HeaderSyncContract {
    dest: Arc<RpcClient>,
    address: Address,
    source: Arc<dyn ChainClient>,
}

impl HeaderSyncContract {
    pub fn new(dest: Arc<RpcClient>, address: Address, source: Arc<dyn ChainClient>) -> Self {
        Self {
            dest,
            address,
            source,
        }
    }
}

#[async_trait]
impl HeaderSyncReader for HeaderSyncContract {
    async fn latest_synced_header(&self) -> Result<Option<SyncedHeader>, RpcError> {
        let ret = self
            .dest
            .call(self.address, &get_latest_synced_header_calldata(), BlockTag::Latest)
            .await?;
        let hash = decode_latest_synced_header(&ret).map_err(|e| RpcError::Decode(e.to_string()))?;
        if hash == B256::ZERO {
            return Ok(None);
        }
        match self.source.header_by_hash(hash).await? {
            Some(header) => Ok(Some(SyncedHeader {
                number: header.number,
                hash,
            })),
            None => {
                tracing::warn!(%hash, "synced header unknown to source node");
                Ok(None)
            }
        }
    }
}

/// What the processor needs from the destination bridge.
#[async_trait]
pub trait DestinationBridge: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    async fn message_status(&self, signal: B256) -> Result<MessageStatus, RpcError>;

    /// Hash of the transaction that delivered `signal`, if one is found.
    async fn find_delivery(&self, signal: B256) -> Result<Option<B256>, RpcError>;

    /// Sign and send `processMessage(message, proof)`. Returns the tx hash without waiting.
    async fn process_message(&self, message: &BridgeMessage, proof: &Proof) -> Result<B256, SubmitError>;

    /// `None` while the transaction is pending.
    async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RpcError>;
}

/// Destination bridge over JSON-RPC, signing with the relayer key.
pub struct DestinationChain {
    rpc: Arc<RpcClient>,
    bridge: Address,
    key: RelayerKey,
    start_block: u64,
    scan_batch_size: u64,
    chain_id: OnceCell<u64>,
    // Held from nonce fetch to broadcast.
    submit_lock: Mutex<()>,
}

impl DestinationChain {
    /// `scan_batch_size` bounds the block range of each `eth_getLogs` in [DestinationBridge::find_delivery].
    pub fn new(
        rpc: Arc<RpcClient>,
        bridge: Address,
        key: RelayerKey,
        start_block: u64,
        scan_batch_size: u64,
    ) -> Self {
        Self {
            rpc,
            bridge,
            key,
            start_block,
            scan_batch_size: scan_batch_size.max(1),
            chain_id: OnceCell::new(),
            submit_lock: Mutex::new(()),
        }
    }

    pub fn relayer_address(&self) -> Address {
        self.key.address()
    }
}

#[async_trait]
impl DestinationBridge for DestinationChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.chain_id
            .get_or_try_init(|| self.rpc.chain_id())
            .await
            .copied()
    }

    async fn message_status(&self, signal: B256) -> Result<MessageStatus, RpcError> {
        let ret = self
            .rpc
            .call(self.bridge, &get_message_status_calldata(signal), BlockTag::Latest)
            .await?;
        decode_message_status(&ret).map_err(|e| RpcError::Decode(e.to_string()))
    }

    async fn find_delivery(&self, signal: B256) -> Result<Option<B256>, RpcError> {
        let tip = self.rpc.block_number().await?;
        let rpc = &self.rpc;
        scan_for_delivery(
            self.bridge,
            signal,
            self.start_block,
            tip,
            self.scan_batch_size,
            |filter| async move { rpc.logs(&filter).await },
        )
        .await
    }

    async fn process_message(&self, message: &BridgeMessage, proof: &Proof) -> Result<B256, SubmitError> {
        let chain_id = self.chain_id().await?;
        let data = process_message_calldata(message, &proof.encoded);
        let from = self.key.address();

        let _guard = self.submit_lock.lock().await;
        let nonce = self
            .rpc
            .transaction_count(from, BlockTag::Pending)
            .await
            .map_err(classify_submit_error)?;
        let gas_price = self.rpc.gas_price().await.map_err(classify_submit_error)?;
        let estimate = self
            .rpc
            .estimate_gas(from, self.bridge, &data)
            .await
            .map_err(classify_submit_error)?;
        let tx = LegacyTx {
            nonce,
            gas_price,
            gas_limit: estimate.saturating_mul(6) / 5,
            to: self.bridge,
            value: 0,
            data,
        };
        let signed = self
            .key
            .sign_legacy(&tx, chain_id)
            .map_err(|e| SubmitError::Rejected(format!("sign: {}", e)))?;
        let hash = broadcast_outcome(signed.hash, self.rpc.send_raw_transaction(&signed.raw).await)?;
        tracing::debug!(tx = %hash, nonce, gas_price, "submitted processMessage");
        Ok(hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RpcError> {
        self.rpc.transaction_receipt(tx_hash).await
    }
}

/// Walk `[from, tip]` backwards in ranges of at most `batch` blocks and return the
/// transaction of the newest delivered `MessageStatusChanged` for `signal`.
/// Stops at the first range holding one.
pub(crate) async fn scan_for_delivery<F, Fut>(
    bridge: Address,
    signal: B256,
    from: u64,
    tip: u64,
    batch: u64,
    mut fetch: F,
) -> Result<Option<B256>, RpcError>
where
    F: FnMut(LogFilter) -> Fut,
    Fut: Future<Output = Result<Vec<Log>, RpcError>>,
{
    for (start, end) in batch_ranges(from, tip, batch).into_iter().rev() {
        let filter = LogFilter {
            address: Some(bridge),
            topics: vec![Some(message_status_changed_topic()), Some(signal)],
            from_block: Some(start),
            to_block: Some(end),
        };
        let mut logs = fetch(filter.clone()).await?;
        logs.retain(|l| !l.removed && filter.matches(l));
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        for log in logs.iter().rev() {
            match decode_message_status_changed(log) {
                Ok((_, status)) if status.is_delivered() => return Ok(Some(log.tx_hash)),
                Ok(_) => {}
                Err(e) => tracing::warn!(reason = %e, tx = %log.tx_hash, "skipping bad MessageStatusChanged log"),
            }
        }
    }
    Ok(None)
}

/// Resolve `eth_sendRawTransaction` against the locally computed hash. A node that
/// already pools the identical transaction counts as a successful broadcast.
fn broadcast_outcome(signed_hash: B256, sent: Result<B256, RpcError>) -> Result<B256, SubmitError> {
    match sent {
        Ok(hash) => {
            if hash != signed_hash {
                tracing::warn!(node = %hash, local = %signed_hash, "node reported a different tx hash");
            }
            Ok(hash)
        }
        Err(e) if e.rpc_message().is_some_and(|m| m.to_ascii_lowercase().contains("already known")) => {
            tracing::debug!(tx = %signed_hash, "transaction already in the node's pool");
            Ok(signed_hash)
        }
        Err(e) => Err(classify_submit_error(e)),
    }
}

/// Map a node error on the submission path to a [SubmitError] kind.
pub fn classify_submit_error(e: RpcError) -> SubmitError {
    let message = match e.rpc_message() {
        Some(m) => m.to_ascii_lowercase(),
        None => return SubmitError::Rpc(e),
    };
    if message.contains("b:status") || message.contains("already processed") {
        return SubmitError::AlreadyProcessed;
    }
    let transient = [
        "nonce too low",
        "nonce too high",
        "underpriced",
        "already known",
        "insufficient funds",
        "gas required exceeds",
    ];
    if transient.iter().any(|needle| message.contains(needle)) || e.is_transient() {
        return SubmitError::Transient(e.to_string());
    }
    SubmitError::Rejected(e.to_string())
}

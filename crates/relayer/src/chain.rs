//! Source-chain client capabilities and their JSON-RPC implementation.

use crate::error::RpcError;
use crate::rpc::{subscribe_new_heads, BlockTag, RpcClient};
use crate::types::{AccountProof, Header, Log, LogFilter, Receipt};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Stream of new head block numbers.
pub type HeadStream = BoxStream<'static, Result<u64, RpcError>>;

/// What the indexer needs from the source chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    /// Header at `number`, or the latest header when `None`.
    async fn header_by_number(&self, number: Option<u64>) -> Result<Option<Header>, RpcError>;

    async fn header_by_hash(&self, hash: B256) -> Result<Option<Header>, RpcError>;

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError>;

    /// Subscribe to new heads. [RpcError::Unsupported] means "poll instead".
    async fn subscribe_heads(&self) -> Result<HeadStream, RpcError>;
}

/// Receipts and storage proofs, for the proof builder.
#[async_trait]
pub trait StateProofClient: ChainClient {
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, RpcError>;

    async fn storage_proof(
        &self,
        address: Address,
        slot: B256,
        block: u64,
    ) -> Result<AccountProof, RpcError>;
}

/// Source chain over HTTP JSON-RPC, with an optional WebSocket endpoint for heads.
#[derive(Debug)]
pub struct SourceChain {
    rpc: Arc<RpcClient>,
    ws_url: Option<String>,
    chain_id: OnceCell<u64>,
}

impl SourceChain {
    pub fn new(rpc: Arc<RpcClient>, ws_url: Option<String>) -> Self {
        Self {
            rpc,
            ws_url,
            chain_id: OnceCell::new(),
        }
    }
}

#[async_trait]
impl ChainClient for SourceChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.chain_id
            .get_or_try_init(|| self.rpc.chain_id())
            .await
            .copied()
    }

    async fn header_by_number(&self, number: Option<u64>) -> Result<Option<Header>, RpcError> {
        let tag = number.map_or(BlockTag::Latest, BlockTag::Number);
        self.rpc.header_by_number(tag).await
    }

    async fn header_by_hash(&self, hash: B256) -> Result<Option<Header>, RpcError> {
        self.rpc.header_by_hash(hash).await
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError> {
        let logs = self.rpc.logs(filter).await?;
        // Some nodes ignore topic filters; re-check client side.
        Ok(logs.into_iter().filter(|l| filter.matches(l)).collect())
    }

    async fn subscribe_heads(&self) -> Result<HeadStream, RpcError> {
        match &self.ws_url {
            Some(url) => subscribe_new_heads(url).await,
            None => Err(RpcError::Unsupported("no WebSocket URL configured".into())),
        }
    }
}

#[async_trait]
impl StateProofClient for SourceChain {
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, RpcError> {
        self.rpc.transaction_receipt(hash).await
    }

    async fn storage_proof(
        &self,
        address: Address,
        slot: B256,
        block: u64,
    ) -> Result<AccountProof, RpcError> {
        self.rpc.proof(address, &[slot], BlockTag::Number(block)).await
    }
}

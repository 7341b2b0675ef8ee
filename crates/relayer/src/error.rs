//! Error types for the relayer, one enum per concern.
//!
//! Retry decisions are made on these types: [RpcError::is_transient],
//! [ProofError::is_retriable], [SubmitError::is_retriable] and
//! [ProcessError::is_retriable] feed the processor's status transitions.

use crate::event::{EventId, EventStatus};
use alloy::primitives::B256;
use thiserror::Error;

/// Startup configuration errors. One variant per missing or invalid field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no event repository")]
    NoEventRepository,
    #[error("no block repository")]
    NoBlockRepository,
    #[error("no source RPC URL")]
    NoSourceRpcUrl,
    #[error("no destination RPC URL")]
    NoDestRpcUrl,
    #[error("no ECDSA key")]
    NoEcdsaKey,
    #[error("invalid ECDSA key: {0}")]
    InvalidEcdsaKey(String),
    #[error("no source bridge address")]
    NoBridgeAddress,
    #[error("no destination bridge address")]
    NoDestBridgeAddress,
    #[error("no destination header-sync address")]
    NoHeaderSyncAddress,
    #[error("block batch size must be > 0")]
    InvalidBlockBatchSize,
    #[error("indexer worker count must be > 0")]
    InvalidIndexerWorkers,
    #[error("processor worker count must be > 0")]
    InvalidWorkerCount,
    #[error("max attempts must be > 0")]
    InvalidMaxAttempts,
    #[error("error channel capacity must be > 0")]
    InvalidErrorChannelCapacity,
    #[error("poll interval must be > 0")]
    InvalidPollInterval,
    #[error("header sync timeout must be > 0 and at most {max_secs}s")]
    InvalidHeaderSyncTimeout { max_secs: u64 },
    #[error("receipt timeout must be > 0 and at most {max_secs}s")]
    InvalidReceiptTimeout { max_secs: u64 },
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// JSON-RPC transport and protocol errors.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("request timed out")]
    Timeout,
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl RpcError {
    /// True for errors that are expected to clear on their own (connection
    /// drops, timeouts, node-side rate limits, lagging nodes).
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Http(_) | RpcError::WebSocket(_) | RpcError::Timeout => true,
            RpcError::Rpc { code, message } => {
                // -32005: limit exceeded.
                *code == -32005 || is_transient_message(message)
            }
            RpcError::Decode(_) | RpcError::Unsupported(_) => false,
        }
    }

    /// The node-side message, if this came back as a JSON-RPC error object.
    pub fn rpc_message(&self) -> Option<&str> {
        match self {
            RpcError::Rpc { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

fn is_transient_message(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    [
        "timeout",
        "timed out",
        "rate limit",
        "too many requests",
        "header not found",
        "unknown block",
        "missing trie node",
        "try again",
    ]
    .iter()
    .any(|needle| m.contains(needle))
}

/// Proof construction errors. Each kind is distinguishable so the processor
/// can tell "wait and retry" from "give up".
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("source transaction {0} not found")]
    TxNotFound(B256),
    #[error("source block {0} not yet available")]
    BlockNotAvailable(u64),
    #[error("source chain unreachable: {0}")]
    Unreachable(#[source] RpcError),
    #[error("malformed proof input: {0}")]
    Malformed(String),
}

impl ProofError {
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ProofError::Malformed(_))
    }
}

/// Destination submission errors.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Nonce races, gas estimation hiccups, dropped connections.
    #[error("transient submission failure: {0}")]
    Transient(String),
    /// The bridge reports the message as already processed.
    #[error("message already processed on destination")]
    AlreadyProcessed,
    /// Any other contract-level rejection.
    #[error("rejected by destination: {0}")]
    Rejected(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl SubmitError {
    pub fn is_retriable(&self) -> bool {
        match self {
            SubmitError::Transient(_) => true,
            SubmitError::Rpc(e) => e.is_transient(),
            SubmitError::AlreadyProcessed | SubmitError::Rejected(_) => false,
        }
    }
}

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("event {0} already exists")]
    Duplicate(EventId),
    #[error("event {0} not found")]
    NotFound(EventId),
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: EventId,
        from: EventStatus,
        to: EventStatus,
    },
    #[error("event {0} cannot be done without a destination transaction hash")]
    MissingDestTxHash(EventId),
    #[error("block cursor regression: {current} -> {requested}")]
    CursorRegression { current: u64, requested: u64 },
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors from one delivery attempt of one event.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("invalid event: {0}")]
    Invalid(String),
    #[error("header sync timed out: need source block {required}, synced {synced:?}")]
    NotSynced { required: u64, synced: Option<u64> },
    #[error("no receipt for destination tx {0} before timeout")]
    NotIncluded(B256),
    #[error("destination tx {0} reverted")]
    Reverted(B256),
    #[error("message delivered on destination but delivery tx not found")]
    DeliveryNotFound,
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Proof(#[from] ProofError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ProcessError {
    /// Whether the attempt should be parked as `retriable-failure`.
    pub fn is_retriable(&self) -> bool {
        match self {
            ProcessError::Invalid(_) | ProcessError::Reverted(_) => false,
            ProcessError::NotSynced { .. }
            | ProcessError::NotIncluded(_)
            | ProcessError::DeliveryNotFound
            | ProcessError::Cancelled => true,
            ProcessError::Proof(e) => e.is_retriable(),
            ProcessError::Submit(e) => e.is_retriable(),
            ProcessError::Rpc(e) => e.is_transient(),
            ProcessError::Repository(_) => true,
        }
    }
}

/// Errors surfaced on the service-level error stream.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("indexer repository failure: {0}")]
    IndexerRepository(#[source] RepositoryError),
    #[error("processor repository failure: {0}")]
    ProcessorRepository(#[source] RepositoryError),
    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

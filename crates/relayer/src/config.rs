//! Relayer configuration.
//!
//! [RelayerConfig] is a plain struct. [RelayerConfig::from_env] fills it from
//! environment variables; [RelayerConfig::validate] rejects missing or zero
//! required fields with one [ConfigError] variant per field.

use crate::error::ConfigError;
use crate::signer::RelayerKey;
use alloy::primitives::Address;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Relayer configuration.
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    /// HTTP RPC URL of the source chain (logs, headers, receipts, proofs).
    pub src_rpc_url: String,
    /// WebSocket RPC URL of the source chain for `newHeads`. Polling when unset.
    pub src_ws_url: Option<String>,
    /// HTTP RPC URL of the destination chain.
    pub dest_rpc_url: String,
    /// Bridge contract on the source chain (emits `MessageSent`).
    pub src_bridge_address: Address,
    /// Bridge contract on the destination chain (`processMessage`).
    pub dest_bridge_address: Address,
    /// Header-sync contract on the destination chain.
    pub dest_header_sync_address: Address,
    /// Hex secp256k1 private key of the relayer.
    pub ecdsa_key: String,
    /// First source block to index when no cursor is persisted.
    pub start_block: u64,
    /// Max block range per `eth_getLogs` request.
    pub block_batch_size: u64,
    /// Batches fetched concurrently during catch-up.
    pub indexer_workers: usize,
    /// Concurrent delivery attempts.
    pub num_workers: usize,
    /// Subscription reconnection backoff.
    pub reconnection: ReconnectionConfig,
    /// Source blocks required on top of an event's block before delivery.
    pub confirmations: u64,
    /// Depth behind the source tip the indexer stays at.
    pub ingest_confirmations: u64,
    pub poll_interval: Duration,
    pub header_sync_timeout: Duration,
    pub receipt_timeout: Duration,
    pub retry: RetryConfig,
    pub rpc_timeout: Duration,
    /// First destination block scanned when looking up a delivery transaction.
    pub dest_start_block: u64,
    /// JSON snapshot file for the repositories. In-memory when `None`.
    pub store_path: Option<PathBuf>,
    pub error_channel_capacity: usize,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            src_rpc_url: String::new(),
            src_ws_url: None,
            dest_rpc_url: String::new(),
            src_bridge_address: Address::ZERO,
            dest_bridge_address: Address::ZERO,
            dest_header_sync_address: Address::ZERO,
            ecdsa_key: String::new(),
            start_block: 0,
            block_batch_size: 100,
            indexer_workers: 1,
            num_workers: 10,
            reconnection: ReconnectionConfig::default(),
            confirmations: 15,
            ingest_confirmations: 0,
            poll_interval: Duration::from_millis(3000),
            header_sync_timeout: Duration::from_secs(600),
            receipt_timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
            rpc_timeout: Duration::from_secs(30),
            dest_start_block: 0,
            store_path: None,
            error_channel_capacity: 64,
        }
    }
}

/// Reconnection backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectionConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

/// Per-event retry policy for the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts before an event is marked `failed`.
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_secs: 5,
            max_backoff_secs: 300,
        }
    }
}

/// Upper bound for the header-sync and receipt timeouts (one week).
pub const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl RelayerConfig {
    /// Check required fields. Reports the first missing or invalid one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.src_rpc_url.trim().is_empty() {
            return Err(ConfigError::NoSourceRpcUrl);
        }
        if self.dest_rpc_url.trim().is_empty() {
            return Err(ConfigError::NoDestRpcUrl);
        }
        RelayerKey::from_hex(&self.ecdsa_key)?;
        if self.src_bridge_address == Address::ZERO {
            return Err(ConfigError::NoBridgeAddress);
        }
        if self.dest_bridge_address == Address::ZERO {
            return Err(ConfigError::NoDestBridgeAddress);
        }
        if self.dest_header_sync_address == Address::ZERO {
            return Err(ConfigError::NoHeaderSyncAddress);
        }
        if self.block_batch_size == 0 {
            return Err(ConfigError::InvalidBlockBatchSize);
        }
        if self.indexer_workers == 0 {
            return Err(ConfigError::InvalidIndexerWorkers);
        }
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }
        if self.error_channel_capacity == 0 {
            return Err(ConfigError::InvalidErrorChannelCapacity);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }
        if self.header_sync_timeout.is_zero() || self.header_sync_timeout > MAX_TIMEOUT {
            return Err(ConfigError::InvalidHeaderSyncTimeout {
                max_secs: MAX_TIMEOUT.as_secs(),
            });
        }
        if self.receipt_timeout.is_zero() || self.receipt_timeout > MAX_TIMEOUT {
            return Err(ConfigError::InvalidReceiptTimeout {
                max_secs: MAX_TIMEOUT.as_secs(),
            });
        }
        Ok(())
    }

    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from a variable lookup. Unset variables keep their defaults; a set
    /// but malformed value is [ConfigError::Invalid]. Does not call [validate](Self::validate).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut c = RelayerConfig::default();

        if let Some(v) = get("SRC_RPC_URL") {
            c.src_rpc_url = v;
        }
        c.src_ws_url = get("SRC_WS_URL");
        if let Some(v) = get("DEST_RPC_URL") {
            c.dest_rpc_url = v;
        }
        if let Some(v) = get("RELAYER_ECDSA_KEY") {
            c.ecdsa_key = v;
        }
        parse_into(&get, "SRC_BRIDGE_ADDRESS", &mut c.src_bridge_address)?;
        parse_into(&get, "DEST_BRIDGE_ADDRESS", &mut c.dest_bridge_address)?;
        parse_into(&get, "DEST_HEADER_SYNC_ADDRESS", &mut c.dest_header_sync_address)?;
        parse_into(&get, "START_BLOCK", &mut c.start_block)?;
        parse_into(&get, "BLOCK_BATCH_SIZE", &mut c.block_batch_size)?;
        parse_into(&get, "INDEXER_WORKERS", &mut c.indexer_workers)?;
        parse_into(&get, "NUM_WORKERS", &mut c.num_workers)?;
        parse_into(&get, "SUBSCRIPTION_BACKOFF_SECS", &mut c.reconnection.initial_backoff_secs)?;
        parse_into(&get, "SUBSCRIPTION_MAX_BACKOFF_SECS", &mut c.reconnection.max_backoff_secs)?;
        parse_into(&get, "CONFIRMATIONS", &mut c.confirmations)?;
        parse_into(&get, "INGEST_CONFIRMATIONS", &mut c.ingest_confirmations)?;
        parse_into(&get, "MAX_ATTEMPTS", &mut c.retry.max_attempts)?;
        parse_into(&get, "RETRY_BACKOFF_SECS", &mut c.retry.initial_backoff_secs)?;
        parse_into(&get, "RETRY_MAX_BACKOFF_SECS", &mut c.retry.max_backoff_secs)?;
        parse_into(&get, "DEST_START_BLOCK", &mut c.dest_start_block)?;
        parse_into(&get, "ERROR_CHANNEL_CAPACITY", &mut c.error_channel_capacity)?;

        let mut ms = c.poll_interval.as_millis() as u64;
        parse_into(&get, "POLL_INTERVAL_MS", &mut ms)?;
        c.poll_interval = Duration::from_millis(ms);
        c.header_sync_timeout = secs(&get, "HEADER_SYNC_TIMEOUT_SECS", c.header_sync_timeout)?;
        c.receipt_timeout = secs(&get, "RECEIPT_TIMEOUT_SECS", c.receipt_timeout)?;
        c.rpc_timeout = secs(&get, "RPC_TIMEOUT_SECS", c.rpc_timeout)?;

        c.store_path = get("STORE_PATH").map(PathBuf::from);
        Ok(c)
    }
}

fn parse_into<T, G>(get: &G, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(var) {
        *slot = raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn secs<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let mut n = default.as_secs();
    parse_into(get, var, &mut n)?;
    Ok(Duration::from_secs(n))
}

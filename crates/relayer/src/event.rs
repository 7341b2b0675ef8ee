//! Event records: one observed `MessageSent` log and its delivery status.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of an observed bridge event: (source chain id, tx hash, log index).
///
/// Globally unique per log and stable across reconnects and backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    pub chain_id: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl EventId {
    pub fn new(chain_id: u64, tx_hash: B256, log_index: u64) -> Self {
        Self {
            chain_id,
            tx_hash,
            log_index,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain_id, self.tx_hash, self.log_index)
    }
}

/// Processing status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    New,
    Processing,
    Done,
    RetriableFailure,
    Failed,
}

impl EventStatus {
    /// Allowed moves: `new -> processing -> {done, retriable-failure, failed}`
    /// and `retriable-failure -> processing`.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, next),
            (New, Processing)
                | (RetriableFailure, Processing)
                | (Processing, Done)
                | (Processing, RetriableFailure)
                | (Processing, Failed)
        )
    }

    /// Statuses the processor pool picks work from.
    pub fn is_claimable(self) -> bool {
        matches!(self, EventStatus::New | EventStatus::RetriableFailure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::New => "new",
            EventStatus::Processing => "processing",
            EventStatus::Done => "done",
            EventStatus::RetriableFailure => "retriable-failure",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded bridge message carried by `MessageSent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMessage {
    pub id: U256,
    pub sender: Address,
    pub src_chain_id: U256,
    pub dest_chain_id: U256,
    pub owner: Address,
    pub to: Address,
    pub refund_address: Address,
    pub deposit_value: U256,
    pub call_value: U256,
    pub processing_fee: U256,
    pub gas_limit: U256,
    pub data: Bytes,
    pub memo: String,
}

impl BridgeMessage {
    /// True if `address` is the sender, the owner, or the recipient of the message.
    pub fn involves(&self, address: &Address) -> bool {
        self.sender == *address || self.owner == *address || self.to == *address
    }
}

/// One observed bridge event plus its processing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub block_number: u64,
    /// Bridge contract that emitted the log.
    pub emitter: Address,
    /// Message hash (topic 1 of `MessageSent`); the destination's delivery key.
    pub signal: B256,
    pub message: BridgeMessage,
    pub status: EventStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub dest_tx_hash: Option<B256>,
}

impl Event {
    /// A freshly ingested event with status `new`.
    pub fn new(
        id: EventId,
        block_number: u64,
        emitter: Address,
        signal: B256,
        message: BridgeMessage,
    ) -> Self {
        Self {
            id,
            block_number,
            emitter,
            signal,
            message,
            status: EventStatus::New,
            attempts: 0,
            last_error: None,
            dest_tx_hash: None,
        }
    }
}

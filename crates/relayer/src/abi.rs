//! ABI bindings for the bridge and header-sync contracts.
//!
//! `MessageSent` logs decode into [Event] records; `processMessage` calls and the
//! `SignalProof` payload are encoded here as well.

use crate::event::{BridgeMessage, Event, EventId};
use crate::types::{Header, Log};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use anyhow::{Context, Result};
use sha3::{Digest, Keccak256};

alloy::sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct Message {
        uint256 id;
        address sender;
        uint256 srcChainId;
        uint256 destChainId;
        address owner;
        address to;
        address refundAddress;
        uint256 depositValue;
        uint256 callValue;
        uint256 processingFee;
        uint256 gasLimit;
        bytes data;
        string memo;
    }

    #[derive(Debug, PartialEq, Eq)]
    event MessageSent(bytes32 indexed signal, Message message);

    #[derive(Debug, PartialEq, Eq)]
    event MessageStatusChanged(bytes32 indexed msgHash, uint8 status);

    function processMessage(Message message, bytes proof);

    function getMessageStatus(bytes32 msgHash) returns (uint8 status);

    function getLatestSyncedHeader() returns (bytes32 hash);

    struct BlockHeader {
        bytes32 parentHash;
        bytes32 ommersHash;
        address beneficiary;
        bytes32 stateRoot;
        bytes32 transactionsRoot;
        bytes32 receiptsRoot;
        bytes32[8] logsBloom;
        uint256 difficulty;
        uint128 height;
        uint64 gasLimit;
        uint64 gasUsed;
        uint64 timestamp;
        bytes extraData;
        bytes32 mixHash;
        uint64 nonce;
        uint256 baseFeePerGas;
    }

    struct SignalProof {
        BlockHeader header;
        bytes proof;
    }
}

/// Destination-side message status, as returned by `getMessageStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    New,
    Retriable,
    Done,
    Failed,
}

impl MessageStatus {
    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            0 => Some(MessageStatus::New),
            1 => Some(MessageStatus::Retriable),
            2 => Some(MessageStatus::Done),
            3 => Some(MessageStatus::Failed),
            _ => None,
        }
    }

    /// The message was executed on the destination (its call may have failed and be retriable there).
    pub fn is_delivered(self) -> bool {
        matches!(self, MessageStatus::Retriable | MessageStatus::Done)
    }
}

/// topic0 of `MessageSent(bytes32,Message)`.
pub fn message_sent_topic() -> B256 {
    MessageSent::SIGNATURE_HASH
}

/// topic0 of `MessageStatusChanged(bytes32,uint8)`.
pub fn message_status_changed_topic() -> B256 {
    MessageStatusChanged::SIGNATURE_HASH
}

pub fn keccak256(data: &[u8]) -> B256 {
    B256::from_slice(&Keccak256::digest(data))
}

/// Message hash as the bridge computes it: `keccak256(abi.encode(message))`.
pub fn hash_message(message: &BridgeMessage) -> B256 {
    keccak256(&Message::from(message).abi_encode())
}

/// Decode a `MessageSent` log into a fresh `new` event.
pub fn decode_message_sent(log: &Log, chain_id: u64) -> Result<Event> {
    let topic0 = log.topics.first().context("Missing topic0")?;
    if *topic0 != MessageSent::SIGNATURE_HASH {
        anyhow::bail!("not a MessageSent log (topic0 {})", topic0);
    }
    let decoded = MessageSent::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .context("decode MessageSent")?;
    Ok(Event::new(
        EventId::new(chain_id, log.tx_hash, log.log_index),
        log.block_number,
        log.address,
        decoded.signal,
        BridgeMessage::from(decoded.message),
    ))
}

/// Calldata for `processMessage(message, proof)`.
pub fn process_message_calldata(message: &BridgeMessage, proof: &Bytes) -> Vec<u8> {
    processMessageCall {
        message: Message::from(message),
        proof: proof.clone(),
    }
    .abi_encode()
}

pub fn get_message_status_calldata(signal: B256) -> Vec<u8> {
    getMessageStatusCall { msgHash: signal }.abi_encode()
}

pub fn decode_message_status(data: &[u8]) -> Result<MessageStatus> {
    let ret = getMessageStatusCall::abi_decode_returns(data, true).context("decode getMessageStatus")?;
    MessageStatus::from_u8(ret.status)
        .ok_or_else(|| anyhow::anyhow!("Invalid MessageStatus {}", ret.status))
}

pub fn get_latest_synced_header_calldata() -> Vec<u8> {
    getLatestSyncedHeaderCall {}.abi_encode()
}

pub fn decode_latest_synced_header(data: &[u8]) -> Result<B256> {
    let ret = getLatestSyncedHeaderCall::abi_decode_returns(data, true)
        .context("decode getLatestSyncedHeader")?;
    Ok(ret.hash)
}

/// Decode a `MessageStatusChanged` log into (msgHash, status).
pub fn decode_message_status_changed(log: &Log) -> Result<(B256, MessageStatus)> {
    let decoded = MessageStatusChanged::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .context("decode MessageStatusChanged")?;
    let status = MessageStatus::from_u8(decoded.status)
        .ok_or_else(|| anyhow::anyhow!("Invalid MessageStatus {}", decoded.status))?;
    Ok((decoded.msgHash, status))
}

/// `abi.encode(SignalProof{header, proof})`, the payload the destination verifier expects.
pub fn encode_signal_proof(header: &Header, proof: Bytes) -> Result<Bytes> {
    let bloom = header.logs_bloom.as_ref();
    if bloom.len() != 256 {
        anyhow::bail!("logsBloom must be 256 bytes, got {}", bloom.len());
    }
    let mut logs_bloom = [B256::ZERO; 8];
    for (i, chunk) in bloom.chunks_exact(32).enumerate() {
        logs_bloom[i] = B256::from_slice(chunk);
    }
    let signal_proof = SignalProof {
        header: BlockHeader {
            parentHash: header.parent_hash,
            ommersHash: header.ommers_hash,
            beneficiary: header.beneficiary,
            stateRoot: header.state_root,
            transactionsRoot: header.transactions_root,
            receiptsRoot: header.receipts_root,
            logsBloom: logs_bloom,
            difficulty: header.difficulty,
            height: u128::from(header.number),
            gasLimit: header.gas_limit,
            gasUsed: header.gas_used,
            timestamp: header.timestamp,
            extraData: header.extra_data.clone(),
            mixHash: header.mix_hash,
            nonce: header.nonce,
            baseFeePerGas: header.base_fee_per_gas.unwrap_or(U256::ZERO),
        },
        proof,
    };
    Ok(Bytes::from(signal_proof.abi_encode()))
}

impl From<&BridgeMessage> for Message {
    fn from(m: &BridgeMessage) -> Self {
        Message {
            id: m.id,
            sender: m.sender,
            srcChainId: m.src_chain_id,
            destChainId: m.dest_chain_id,
            owner: m.owner,
            to: m.to,
            refundAddress: m.refund_address,
            depositValue: m.deposit_value,
            callValue: m.call_value,
            processingFee: m.processing_fee,
            gasLimit: m.gas_limit,
            data: m.data.clone(),
            memo: m.memo.clone(),
        }
    }
}

impl From<Message> for BridgeMessage {
    fn from(m: Message) -> Self {
        BridgeMessage {
            id: m.id,
            sender: m.sender,
            src_chain_id: m.srcChainId,
            dest_chain_id: m.destChainId,
            owner: m.owner,
            to: m.to,
            refund_address: m.refundAddress,
            deposit_value: m.depositValue,
            call_value: m.callValue,
            processing_fee: m.processingFee,
            gas_limit: m.gasLimit,
            data: m.data,
            memo: m.memo,
        }
    }
}

/// Build a `MessageSent` log for `message` (encoding side of [decode_message_sent]).
pub fn encode_message_sent(
    emitter: Address,
    message: &BridgeMessage,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
) -> Log {
    let signal = hash_message(message);
    let event = MessageSent {
        signal,
        message: Message::from(message),
    };
    Log {
        address: emitter,
        topics: vec![MessageSent::SIGNATURE_HASH, signal],
        data: Bytes::from(event.encode_data()),
        block_number,
        tx_hash,
        log_index,
        removed: false,
    }
}

/// Build a `MessageStatusChanged` log (encoding side of [decode_message_status_changed]).
pub fn encode_message_status_changed(
    emitter: Address,
    signal: B256,
    status: MessageStatus,
    block_number: u64,
    tx_hash: B256,
) -> Log {
    let event = MessageStatusChanged {
        msgHash: signal,
        status: status as u8,
    };
    Log {
        address: emitter,
        topics: vec![MessageStatusChanged::SIGNATURE_HASH, signal],
        data: Bytes::from(event.encode_data()),
        block_number,
        tx_hash,
        log_index: 0,
        removed: false,
    }
}

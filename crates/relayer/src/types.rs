//! Chain data shapes decoded from JSON-RPC results (headers, logs, receipts, proofs).

use crate::error::RpcError;
use alloy::primitives::{Address, Bytes, B256, U256};
use serde_json::{json, Value};
use std::str::FromStr;

/// Block header fields needed for batching, anchoring and proof encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub hash: B256,
    pub parent_hash: B256,
    pub ommers_hash: B256,
    pub beneficiary: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bytes,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_hash: B256,
    pub nonce: u64,
    pub base_fee_per_gas: Option<U256>,
}

/// A log as returned by `eth_getLogs` / receipts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    /// Set by the node when the log was removed by a reorg.
    pub removed: bool,
}

/// Transaction receipt subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    /// `true` when the transaction succeeded (status 0x1).
    pub status: bool,
    pub logs: Vec<Log>,
}

/// `eth_getProof` result for a single account and its storage slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountProof {
    pub account_proof: Vec<Bytes>,
    pub storage_proof: Vec<StorageProof>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageProof {
    pub key: B256,
    pub value: U256,
    pub proof: Vec<Bytes>,
}

/// Log filter for `eth_getLogs`. Topics are positional; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Option<Address>,
    pub topics: Vec<Option<B256>>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    pub fn to_json(&self) -> Value {
        let mut filter = json!({});
        if let Some(address) = self.address {
            filter["address"] = Value::String(address.to_string());
        }
        if !self.topics.is_empty() {
            let topics: Vec<Value> = self
                .topics
                .iter()
                .map(|t| t.map(|t| Value::String(t.to_string())).unwrap_or(Value::Null))
                .collect();
            filter["topics"] = Value::Array(topics);
        }
        if let Some(from) = self.from_block {
            filter["fromBlock"] = Value::String(format!("0x{:x}", from));
        }
        if let Some(to) = self.to_block {
            filter["toBlock"] = Value::String(format!("0x{:x}", to));
        }
        filter
    }

    /// Client-side match, for nodes that ignore topic filters.
    pub fn matches(&self, log: &Log) -> bool {
        if let Some(address) = self.address {
            if log.address != address {
                return false;
            }
        }
        self.topics.iter().enumerate().all(|(i, t)| match t {
            Some(t) => log.topics.get(i) == Some(t),
            None => true,
        })
    }
}

impl Header {
    pub fn from_json(v: &Value) -> Result<Self, RpcError> {
        Ok(Self {
            hash: field_b256(v, "hash")?,
            parent_hash: field_b256(v, "parentHash")?,
            ommers_hash: field_b256(v, "sha3Uncles")?,
            beneficiary: field_address(v, "miner")?,
            state_root: field_b256(v, "stateRoot")?,
            transactions_root: field_b256(v, "transactionsRoot")?,
            receipts_root: field_b256(v, "receiptsRoot")?,
            logs_bloom: field_bytes(v, "logsBloom")?,
            difficulty: field_u256(v, "difficulty")?,
            number: field_u64(v, "number")?,
            gas_limit: field_u64(v, "gasLimit")?,
            gas_used: field_u64(v, "gasUsed")?,
            timestamp: field_u64(v, "timestamp")?,
            extra_data: field_bytes(v, "extraData")?,
            mix_hash: field_b256(v, "mixHash")?,
            nonce: field_u64(v, "nonce")?,
            base_fee_per_gas: match v.get("baseFeePerGas").and_then(|b| b.as_str()) {
                Some(s) => Some(parse_hex_u256(s)?),
                None => None,
            },
        })
    }
}

impl Log {
    pub fn from_json(v: &Value) -> Result<Self, RpcError> {
        let topics = v
            .get("topics")
            .and_then(|t| t.as_array())
            .ok_or_else(|| RpcError::Decode("Missing topics".into()))?
            .iter()
            .map(|t| {
                t.as_str()
                    .ok_or_else(|| RpcError::Decode("topic not str".into()))
                    .and_then(parse_hex_b256)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            address: field_address(v, "address")?,
            topics,
            data: field_bytes(v, "data")?,
            block_number: field_u64(v, "blockNumber")?,
            tx_hash: field_b256(v, "transactionHash")?,
            log_index: field_u64(v, "logIndex")?,
            removed: v.get("removed").and_then(|r| r.as_bool()).unwrap_or(false),
        })
    }
}

impl Receipt {
    pub fn from_json(v: &Value) -> Result<Self, RpcError> {
        let logs = v
            .get("logs")
            .and_then(|l| l.as_array())
            .map(|logs| logs.iter().map(Log::from_json).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            tx_hash: field_b256(v, "transactionHash")?,
            block_number: field_u64(v, "blockNumber")?,
            block_hash: field_b256(v, "blockHash")?,
            status: field_u64(v, "status")? == 1,
            logs,
        })
    }
}

impl AccountProof {
    pub fn from_json(v: &Value) -> Result<Self, RpcError> {
        let account_proof = bytes_array(v, "accountProof")?;
        let storage_proof = v
            .get("storageProof")
            .and_then(|s| s.as_array())
            .ok_or_else(|| RpcError::Decode("Missing storageProof".into()))?
            .iter()
            .map(|entry| {
                Ok(StorageProof {
                    key: field_b256(entry, "key")?,
                    value: field_u256(entry, "value")?,
                    proof: bytes_array(entry, "proof")?,
                })
            })
            .collect::<Result<Vec<_>, RpcError>>()?;
        Ok(Self {
            account_proof,
            storage_proof,
        })
    }
}

fn field_str<'a>(v: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    v.get(key)
        .and_then(|f| f.as_str())
        .ok_or_else(|| RpcError::Decode(format!("Missing {}", key)))
}

fn field_u64(v: &Value, key: &str) -> Result<u64, RpcError> {
    parse_hex_u64(field_str(v, key)?)
}

fn field_u256(v: &Value, key: &str) -> Result<U256, RpcError> {
    parse_hex_u256(field_str(v, key)?)
}

fn field_b256(v: &Value, key: &str) -> Result<B256, RpcError> {
    parse_hex_b256(field_str(v, key)?)
}

fn field_address(v: &Value, key: &str) -> Result<Address, RpcError> {
    parse_hex_address(field_str(v, key)?)
}

fn field_bytes(v: &Value, key: &str) -> Result<Bytes, RpcError> {
    parse_hex_bytes(field_str(v, key)?)
}

fn bytes_array(v: &Value, key: &str) -> Result<Vec<Bytes>, RpcError> {
    v.get(key)
        .and_then(|a| a.as_array())
        .ok_or_else(|| RpcError::Decode(format!("Missing {}", key)))?
        .iter()
        .map(|n| {
            n.as_str()
                .ok_or_else(|| RpcError::Decode(format!("{} entry not str", key)))
                .and_then(parse_hex_bytes)
        })
        .collect()
}

pub fn parse_hex_u64(s: &str) -> Result<u64, RpcError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(s, 16).map_err(|e| RpcError::Decode(format!("parse hex u64: {}", e)))
}

pub fn parse_hex_u256(s: &str) -> Result<U256, RpcError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| RpcError::Decode(format!("parse hex u256: {}", e)))
}

pub fn parse_hex_bytes(s: &str) -> Result<Bytes, RpcError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s)
        .map(Bytes::from)
        .map_err(|e| RpcError::Decode(format!("parse hex bytes: {}", e)))
}

pub fn parse_hex_b256(s: &str) -> Result<B256, RpcError> {
    // Some nodes return storage keys without leading zeros, so the digit count can be odd.
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes = if digits.len() % 2 == 1 {
        parse_hex_bytes(&format!("0{}", digits))?
    } else {
        parse_hex_bytes(digits)?
    };
    if bytes.len() > 32 {
        return Err(RpcError::Decode(format!("Expected 32 bytes, got {}", bytes.len())));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(B256::from(out))
}

pub fn parse_hex_address(s: &str) -> Result<Address, RpcError> {
    Address::from_str(s).map_err(|e| RpcError::Decode(format!("parse address: {}", e)))
}

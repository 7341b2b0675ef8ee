//! Proof builder: storage proof of the bridge's signal slot, anchored at a synced header.
//!
//! The encoded proof is `abi.encode(SignalProof{header, rlp([accountProof, storageProof])})`,
//! where each inner element is itself the RLP list of trie nodes.

use crate::abi::{encode_signal_proof, keccak256, message_sent_topic};
use crate::chain::StateProofClient;
use crate::destination::SyncedHeader;
use crate::error::{ProofError, RpcError};
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use rlp::RlpStream;
use std::sync::Arc;

/// Proof bytes plus the header they are anchored to. Rebuilt on every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub anchor: SyncedHeader,
    pub encoded: Bytes,
}

#[async_trait]
pub trait ProofBuilder: Send + Sync {
    async fn build_proof(
        &self,
        tx_hash: B256,
        signal: B256,
        anchor: &SyncedHeader,
    ) -> Result<Proof, ProofError>;
}

/// Storage slot of `signal` in the bridge's signal mapping: `keccak256(bridge ++ signal)`.
pub fn signal_slot(bridge: Address, signal: B256) -> B256 {
    let mut packed = Vec::with_capacity(52);
    packed.extend_from_slice(bridge.as_slice());
    packed.extend_from_slice(signal.as_slice());
    keccak256(&packed)
}

/// `rlp([rlp(accountProof), rlp(storageProof)])`.
pub fn encode_merkle_proof(account_proof: &[Bytes], storage_proof: &[Bytes]) -> Bytes {
    let nodes = |proof: &[Bytes]| {
        let mut s = RlpStream::new_list(proof.len());
        for node in proof {
            s.append(&node.as_ref());
        }
        s.out().to_vec()
    };
    let account = nodes(account_proof);
    let storage = nodes(storage_proof);
    let mut outer = RlpStream::new_list(2);
    outer.append(&account.as_slice());
    outer.append(&storage.as_slice());
    Bytes::from(outer.out().to_vec())
}

/// JSON-RPC backed [ProofBuilder] for one source bridge.
pub struct Prover {
    client: Arc<dyn StateProofClient>,
    bridge: Address,
}

impl Prover {
    pub fn new(client: Arc<dyn StateProofClient>, bridge: Address) -> Self {
        Self { client, bridge }
    }
}

fn unreachable(e: RpcError) -> ProofError {
    ProofError::Unreachable(e)
}

#[async_trait]
impl ProofBuilder for Prover {
    async fn build_proof(
        &self,
        tx_hash: B256,
        signal: B256,
        anchor: &SyncedHeader,
    ) -> Result<Proof, ProofError> {
        let receipt = self
            .client
            .transaction_receipt(tx_hash)
            .await
            .map_err(unreachable)?
            .ok_or(ProofError::TxNotFound(tx_hash))?;
        if !receipt.status {
            return Err(ProofError::Malformed(format!("source tx {} reverted", tx_hash)));
        }
        let topic0 = message_sent_topic();
        let found = receipt.logs.iter().any(|l| {
            l.address == self.bridge
                && l.topics.first() == Some(&topic0)
                && l.topics.get(1) == Some(&signal)
        });
        if !found {
            return Err(ProofError::Malformed(format!(
                "no MessageSent log for signal {} in tx {}",
                signal, tx_hash
            )));
        }
        if receipt.block_number > anchor.number {
            return Err(ProofError::BlockNotAvailable(receipt.block_number));
        }

        let header = self
            .client
            .header_by_hash(anchor.hash)
            .await
            .map_err(unreachable)?
            .ok_or(ProofError::BlockNotAvailable(anchor.number))?;
        if header.number != anchor.number {
            return Err(ProofError::BlockNotAvailable(anchor.number));
        }

        let slot = signal_slot(self.bridge, signal);
        let account = self
            .client
            .storage_proof(self.bridge, slot, anchor.number)
            .await
            .map_err(unreachable)?;
        let storage = account
            .storage_proof
            .first()
            .ok_or_else(|| ProofError::Malformed("empty storageProof".into()))?;
        if storage.value == U256::ZERO {
            return Err(ProofError::Malformed(format!(
                "signal {} not set at block {}",
                signal, anchor.number
            )));
        }

        let merkle = encode_merkle_proof(&account.account_proof, &storage.proof);
        let encoded = encode_signal_proof(&header, merkle).map_err(|e| ProofError::Malformed(e.to_string()))?;
        tracing::debug!(tx = %tx_hash, anchor = anchor.number, "built signal proof");
        Ok(Proof {
            anchor: *anchor,
            encoded,
        })
    }
}

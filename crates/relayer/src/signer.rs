//! Relayer identity: secp256k1 key, derived address, and legacy EIP-155 transaction signing.

use crate::error::ConfigError;
use alloy::primitives::{Address, B256};
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use sha3::{Digest, Keccak256};
use std::fmt;

/// Unsigned legacy transaction fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u64,
    pub data: Vec<u8>,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub raw: Vec<u8>,
    pub hash: B256,
}

/// The relayer's signing key. Held in memory only; never serialized.
pub struct RelayerKey {
    signing_key: SigningKey,
    address: Address,
}

impl fmt::Debug for RelayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl RelayerKey {
    /// Parse a hex private key (with or without `0x`).
    pub fn from_hex(key: &str) -> Result<Self, ConfigError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::NoEcdsaKey);
        }
        let bytes = hex::decode(key.strip_prefix("0x").unwrap_or(key))
            .map_err(|e| ConfigError::InvalidEcdsaKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(ConfigError::InvalidEcdsaKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| ConfigError::InvalidEcdsaKey(e.to_string()))?;
        let address = address_of(&signing_key);
        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `tx` for `chain_id` (EIP-155 legacy encoding).
    pub fn sign_legacy(&self, tx: &LegacyTx, chain_id: u64) -> Result<SignedTx, k256::ecdsa::Error> {
        let unsigned_rlp = rlp_encode_unsigned_legacy(tx, chain_id);
        let (signature, recovery_id) = self
            .signing_key
            .sign_digest_recoverable(Keccak256::new_with_prefix(unsigned_rlp))?;

        let v: u64 = chain_id * 2 + 35 + u64::from(recovery_id.to_byte());

        let sig_bytes = signature.to_bytes();
        let sig_slice: &[u8] = sig_bytes.as_ref();
        let r_trimmed = trim_leading_zeros(&sig_slice[0..32]);
        let s_trimmed = trim_leading_zeros(&sig_slice[32..64]);

        let mut signed = RlpStream::new();
        signed.begin_list(9);
        signed.append(&tx.nonce);
        signed.append(&tx.gas_price);
        signed.append(&tx.gas_limit);
        let to_slice: &[u8] = tx.to.as_slice();
        signed.append(&to_slice);
        signed.append(&tx.value);
        let data_slice: &[u8] = &tx.data;
        signed.append(&data_slice);
        signed.append(&v);
        signed.append(&r_trimmed);
        signed.append(&s_trimmed);
        let raw = signed.out().to_vec();
        let hash = B256::from_slice(&Keccak256::digest(&raw));
        Ok(SignedTx { raw, hash })
    }
}

fn address_of(signing_key: &SigningKey) -> Address {
    let point = signing_key.verifying_key().to_encoded_point(false);
    // Uncompressed SEC1: 0x04 || X || Y; the address is the last 20 bytes of keccak(X || Y).
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}

/// RLP for the EIP-155 signing payload: [nonce, gas_price, gas_limit, to, value, data, chain_id, 0, 0].
fn rlp_encode_unsigned_legacy(tx: &LegacyTx, chain_id: u64) -> Vec<u8> {
    let mut s = RlpStream::new();
    s.begin_list(9);
    s.append(&tx.nonce);
    s.append(&tx.gas_price);
    s.append(&tx.gas_limit);
    let to_slice: &[u8] = tx.to.as_slice();
    s.append(&to_slice);
    s.append(&tx.value);
    let data_slice: &[u8] = &tx.data;
    s.append(&data_slice);
    s.append(&chain_id);
    s.append(&0u8);
    s.append(&0u8);
    s.out().to_vec()
}

/// Trim leading zero bytes for RLP integer encoding. Zero becomes the empty slice (encodes as 0x80).
fn trim_leading_zeros(b: &[u8]) -> &[u8] {
    let first = b.iter().position(|x| *x != 0).unwrap_or(b.len());
    &b[first..]
}

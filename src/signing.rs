// Cryptographic signing module
// This file handles transaction signing and key management for the shared
// operating account that submits router calls on every network
//
// Numan Thabit 2025 Nov

use crate::errors::ChainError;
use alloy_consensus::transaction::RlpEcdsaEncodableTx;
use alloy_consensus::{SignableTransaction, TxLegacy};
use alloy_primitives::{keccak256, Address, Signature, U256};
use hex::FromHex;
use k256::ecdsa::SigningKey;

/// Key of the shared operating account.
pub struct OperatorKey {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for OperatorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl OperatorKey {
    pub fn from_hex(secret_hex: &str) -> Result<Self, ChainError> {
        let trimmed = secret_hex.trim().trim_start_matches("0x");
        let bytes = <[u8; 32]>::from_hex(trimmed)
            .map_err(|e| ChainError::Signing(format!("bad hex key: {e}")))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| ChainError::Signing(format!("invalid secp256k1 key: {e}")))?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign and RLP-encode a transaction ready for `eth_sendRawTransaction`.
    ///
    /// `tx.chain_id` must be set; the signature carries the EIP-155 `v`.
    pub fn sign_legacy(&self, tx: &TxLegacy) -> Result<Vec<u8>, ChainError> {
        if tx.chain_id.is_none() {
            return Err(ChainError::Signing("legacy transaction without chain id".into()));
        }
        let hash = tx.signature_hash();
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let sig_bytes = signature.to_bytes();
        let signature = Signature::new(
            U256::from_be_slice(&sig_bytes[..32]),
            U256::from_be_slice(&sig_bytes[32..]),
            recovery_id.is_y_odd(),
        );

        let mut raw = Vec::new();
        tx.rlp_encode_signed(&signature, &mut raw);
        Ok(raw)
    }
}

fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

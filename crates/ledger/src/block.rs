//! Blocks and the hash-chain header

use crate::{error::LedgerError, sha256_hex, transaction::Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder until validator keys exist
pub const VALIDATOR_PUBLIC_KEY_PLACEHOLDER: &str = "public-key";

/// Placeholder until validator signatures exist
pub const VERIFICATION_SEQUENCE_PLACEHOLDER: &str = "123456789";

/// Network endpoint of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// `ip:port` form accepted by the socket layer
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Validators keyed by peer id
pub type ValidatorSet = BTreeMap<String, PeerAddress>;

/// Chain linkage and validator metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    /// Validator set that produced this block (informational)
    pub validators: Vec<String>,
    pub validator_public_key: String,
    pub validator_verification_sequence: String,
    pub last_block_hash: String,
    pub block_number: u64,
    /// Assigned by the chain store on acceptance
    pub block_hash: String,
    /// Validators elected for the following block
    pub next_validators: ValidatorSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub sequence: String,
    pub transactions: Vec<Transaction>,
}

/// A chain unit: header plus ordered transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "__header")]
    pub header: BlockHeader,
    pub payload: BlockPayload,
}

impl Block {
    /// Stage an empty block on top of the given tip.
    ///
    /// `tip` is `(block_hash, block_number)` of the last persisted block, or
    /// `None` on an empty chain, in which case the block is number 1 with an
    /// empty `last_block_hash`.
    pub fn stage(tip: Option<(&str, u64)>, validators: Vec<String>) -> Self {
        let (last_hash, last_number) = tip.unwrap_or(("", 0));
        let block_number = last_number.saturating_add(1);

        Self {
            header: BlockHeader {
                validators,
                validator_public_key: VALIDATOR_PUBLIC_KEY_PLACEHOLDER.to_string(),
                validator_verification_sequence: VERIFICATION_SEQUENCE_PLACEHOLDER.to_string(),
                last_block_hash: last_hash.to_string(),
                block_number,
                block_hash: String::new(),
                next_validators: ValidatorSet::new(),
            },
            payload: BlockPayload {
                sequence: format!("{}{}", last_number, block_number),
                transactions: Vec::new(),
            },
        }
    }

    pub fn add_transaction(&mut self, tx: Transaction) {
        self.payload.transactions.push(tx);
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.payload.transactions
    }

    pub fn block_number(&self) -> u64 {
        self.header.block_number
    }

    pub fn block_hash(&self) -> &str {
        &self.header.block_hash
    }

    pub fn last_block_hash(&self) -> &str {
        &self.header.last_block_hash
    }

    pub fn next_validators(&self) -> &ValidatorSet {
        &self.header.next_validators
    }

    pub fn is_sealed(&self) -> bool {
        !self.header.block_hash.is_empty()
    }

    /// SHA-256 over the serialized block with `block_hash` blank.
    ///
    /// This is the hash the chain store assigns at acceptance, so recomputing
    /// it on a stored block reproduces the stored hash.
    pub fn compute_hash(&self) -> Result<String, LedgerError> {
        let bytes = if self.header.block_hash.is_empty() {
            serde_json::to_vec(self)?
        } else {
            let mut unsealed = self.clone();
            unsealed.header.block_hash.clear();
            serde_json::to_vec(&unsealed)?
        };
        Ok(sha256_hex(&bytes))
    }

    /// Record the accepted hash
    pub fn seal(&mut self, hash: String) {
        self.header.block_hash = hash;
    }

    /// Serialized size in bytes
    pub fn encoded_len(&self) -> Result<usize, LedgerError> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

//! Stakechain ledger - value objects shared by every service
//!
//! This crate provides:
//! - Transactions (hold-stake, upload, download) and their confirmation hash
//! - Blocks and the hash-chain header
//! - The fixed fee/cost/reward schedule and the incentive calculator
//! - Newline-delimited JSON envelopes spoken between services

pub mod block;
pub mod error;
pub mod incentive;
pub mod pricing;
pub mod transaction;
pub mod wire;

pub use block::{Block, BlockHeader, BlockPayload, PeerAddress, ValidatorSet};
pub use error::LedgerError;
pub use incentive::{peer_balance, PeerAccount, INITIAL_BALANCE};
pub use pricing::{price_transaction, FeeQuote};
pub use transaction::{Submission, Transaction, TransactionCode, TransactionKind};

use sha2::{Digest, Sha256};

/// Maximum number of validators elected for the next block
pub const MAX_NEXT_VALIDATORS: usize = 5;

/// Transactions a pending block must hold before emission is considered
pub const EMISSION_THRESHOLD: usize = 2;

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

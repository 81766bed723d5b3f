//! Fixed fee schedule

use crate::transaction::{Transaction, TransactionCode};

/// Fee, cost and reward charged for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub fee: i64,
    pub cost: i64,
    pub reward: i64,
}

impl FeeQuote {
    /// Quote for a transaction kind
    pub const fn for_code(code: TransactionCode) -> Self {
        match code {
            TransactionCode::HoldStake => Self { fee: 1, cost: 1, reward: 5 },
            TransactionCode::Upload => Self { fee: 1, cost: 1, reward: 5 },
            TransactionCode::Download => Self { fee: 1, cost: 2, reward: 0 },
        }
    }
}

/// Apply the fee schedule. No balance check is made.
pub fn price_transaction(mut tx: Transaction) -> Transaction {
    let quote = FeeQuote::for_code(tx.code());
    tx.fee = quote.fee;
    tx.cost = quote.cost;
    tx.reward = quote.reward;
    tx
}

//! Ledger errors

use crate::transaction::TransactionCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unknown transaction code {0}")]
    UnknownTransactionCode(i64),

    #[error("{code:?} transaction is missing field `{field}`")]
    MissingField {
        code: TransactionCode,
        field: &'static str,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

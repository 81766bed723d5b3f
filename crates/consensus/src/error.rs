//! Consensus errors

use stakechain_ledger::{wire::WireError, LedgerError};
use stakechain_store::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("Malformed submission: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("No validator known to forward the transaction to")]
    NoValidators,

    #[error("No validator accepted the forwarded transaction")]
    ForwardFailed,

    #[error("{0} is not a validator and does not relay forwarded transactions")]
    NotElected(String),

    #[error("Consensus dispatcher stopped")]
    DispatcherStopped,
}

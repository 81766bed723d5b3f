//! Network errors

use stakechain_ledger::wire::WireError;
use stakechain_store::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Malformed request data: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown request type {0}")]
    UnknownRequestType(i64),
}

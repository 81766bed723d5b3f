//! Chain store errors

use stakechain_ledger::{wire::WireError, LedgerError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainStoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Chunk file {path:?} is corrupt: {source}")]
    CorruptChunk {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Errors answering a data-layer request
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Unknown message type {0}")]
    UnknownMessageType(i64),

    #[error("Malformed message data: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] ChainStoreError),
}

/// Errors reaching the chain store through a backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Store(#[from] ChainStoreError),

    #[error("Unexpected data-layer response: {0}")]
    UnexpectedResponse(String),

    #[error("Chain store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::UnexpectedResponse(e.to_string())
    }
}

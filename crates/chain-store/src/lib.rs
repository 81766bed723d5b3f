//! Chain store - the only writer of persisted chain state
//!
//! This crate provides:
//! - `ChainStore`: hash-links blocks and persists them into size-bounded
//!   JSON chunk files
//! - `DataService`: the data-layer TCP endpoint in front of the store
//! - `ChainBackend`: the seam other services use to reach the store, either
//!   in-process or over a fresh connection per request

pub mod backend;
pub mod chunk;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;

pub use backend::{ChainBackend, LocalChainBackend, RemoteChainBackend};
pub use chunk::Chunk;
pub use error::{BackendError, ChainStoreError, RequestError};
pub use protocol::DataMessageType;
pub use server::DataService;
pub use store::{AddBlockOutcome, ChainStore, ChainStoreConfig, RejectReason};

/// A new chunk is opened once the active one grows past this many bytes
pub const DEFAULT_CHUNK_SIZE_LIMIT: usize = 5 * 1024 * 1024;

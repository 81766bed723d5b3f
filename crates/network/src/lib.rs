//! Stakechain network - replication of accepted blocks between peers
//!
//! This crate provides:
//! - `NetworkValidator`: checks blocks proposed by remote validators against
//!   the chain tip before handing them to the chain store
//! - `Fanout`: sharded best-effort broadcast of accepted blocks
//! - `PeerDirectory`: static or remote lookup of peer endpoints
//! - `NetworkService`: the TCP endpoint peers propose blocks to

pub mod codes;
pub mod directory;
pub mod error;
pub mod fanout;
pub mod server;
pub mod validator;

pub use codes::{OptCode, RequestType};
pub use directory::{PeerDirectory, RemotePeerDirectory, StaticPeerDirectory};
pub use error::NetworkError;
pub use fanout::{Fanout, FanoutConfig, FanoutReport};
pub use server::NetworkService;
pub use validator::{ChainListener, NetworkValidator};

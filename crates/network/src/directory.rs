//! Peer directory - where to find every peer's network endpoint

use crate::error::NetworkError;
use async_trait::async_trait;
use stakechain_ledger::{
    wire::{self, Envelope},
    ValidatorSet,
};
use std::time::Duration;

/// `message_type` of a directory lookup
pub const DIRECTORY_LOOKUP: i64 = 2;

#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Every known peer keyed by peer id
    async fn peers(&self) -> Result<ValidatorSet, NetworkError>;
}

/// Peers fixed by configuration
#[derive(Debug, Clone, Default)]
pub struct StaticPeerDirectory {
    peers: ValidatorSet,
}

impl StaticPeerDirectory {
    pub fn new(peers: ValidatorSet) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl PeerDirectory for StaticPeerDirectory {
    async fn peers(&self) -> Result<ValidatorSet, NetworkError> {
        Ok(self.peers.clone())
    }
}

/// Peers looked up from a directory service, answered as `{peer_id: {ip, port}}`
#[derive(Debug, Clone)]
pub struct RemotePeerDirectory {
    addr: String,
    timeout: Duration,
}

impl RemotePeerDirectory {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PeerDirectory for RemotePeerDirectory {
    async fn peers(&self) -> Result<ValidatorSet, NetworkError> {
        let peers: ValidatorSet =
            wire::request(&self.addr, &Envelope::bare(DIRECTORY_LOOKUP), self.timeout).await?;
        tracing::debug!("Directory {} returned {} peers", self.addr, peers.len());
        Ok(peers)
    }
}

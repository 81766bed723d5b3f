//! Core types for the consensus service

use serde::Serialize;
use stakechain_store::RejectReason;
use std::time::Duration;

/// Role of the local process for the block being produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeRole {
    /// Stages and emits blocks
    Validator,
    /// Forwards submissions to the current validator set
    NonValidator,
}

/// Result of an emission task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmissionOutcome {
    Accepted { hash: String },
    Rejected(RejectReason),
    /// The chain store could not be reached
    Failed(String),
}

impl EmissionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EmissionOutcome::Accepted { .. })
    }
}

/// Configuration for the consensus service
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Local peer id, compared against validator sets
    pub peer_id: String,
    /// Inbound connections idle this long are closed
    pub idle_timeout: Duration,
    /// Connect/IO budget for outbound requests
    pub request_timeout: Duration,
    /// Capacity of the dispatcher queue
    pub max_inflight_messages: usize,
    /// Messages handled concurrently by the dispatcher
    pub max_workers: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            peer_id: String::new(),
            idle_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            max_inflight_messages: 1024,
            max_workers: 32,
        }
    }
}

/// Counters exposed by the consensus service
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsensusStats {
    pub transactions_staged: u64,
    pub transactions_forwarded: u64,
    pub blocks_emitted: u64,
    pub blocks_rejected: u64,
    pub emissions_skipped: u64,
    pub emissions_failed: u64,
    /// Blocks from other validators the stager moved onto
    pub blocks_followed: u64,
}

//! Stakechain consensus - block staging on validator processes
//!
//! Architecture:
//! - Clients submit transactions to the consensus endpoint
//! - A validator prices, confirms and stages them into one pending block
//! - Once the block holds enough transactions and someone staked, the next
//!   validators are elected and the block is emitted to the chain store
//! - Non-validators forward submissions to the current validator set
//! - Accepted blocks are gossiped; blocks from other validators move the
//!   stager onto the new tip

pub mod bootstrap;
pub mod election;
pub mod error;
pub mod server;
pub mod service;
pub mod stager;
pub mod types;

#[cfg(test)]
mod tests;

pub use bootstrap::{bootstrap, GenesisElection, StaticGenesis};
pub use election::{elect_next_validators, rank_candidates, Candidate};
pub use error::ConsensusError;
pub use service::{ConsensusService, ConsensusServiceBuilder};
pub use stager::{Admission, BlockStager, EmissionTrigger};
pub use types::*;

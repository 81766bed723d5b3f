//! Validator bootstrap
//!
//! On start the validator set is derived from the persisted chain: the tip's
//! next validators. An empty chain has no such record, so the initial set
//! comes from a `GenesisElection`.

use crate::{error::ConsensusError, stager::BlockStager, types::NodeRole};
use stakechain_ledger::ValidatorSet;
use stakechain_store::ChainBackend;

/// Source of the validator set for the first block
pub trait GenesisElection: Send + Sync {
    fn genesis_validators(&self) -> ValidatorSet;
}

/// Genesis validators fixed by configuration
#[derive(Debug, Clone, Default)]
pub struct StaticGenesis {
    validators: ValidatorSet,
}

impl StaticGenesis {
    pub fn new(validators: ValidatorSet) -> Self {
        Self { validators }
    }
}

impl GenesisElection for StaticGenesis {
    fn genesis_validators(&self) -> ValidatorSet {
        self.validators.clone()
    }
}

/// Load the current validator set into `stager` and, if the local peer is a
/// member, stage the next block on the chain tip.
pub async fn bootstrap(
    stager: &mut BlockStager,
    backend: &dyn ChainBackend,
    genesis: &dyn GenesisElection,
) -> Result<NodeRole, ConsensusError> {
    let chain = backend.chain().await?;
    let tip = chain.last();

    let validators = match tip {
        Some(tip) => tip.next_validators().clone(),
        None => {
            tracing::info!("Chain is empty, using genesis validators");
            genesis.genesis_validators()
        }
    };
    stager.set_validators(validators);

    if stager.is_validator() {
        stager.stage_new_block(tip);
    }

    tracing::info!(
        "Bootstrapped {} as {:?} over {} blocks ({} validators)",
        stager.peer_id(),
        stager.role(),
        chain.len(),
        stager.validators().len()
    );
    Ok(stager.role())
}

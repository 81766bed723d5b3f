//! Block stager - the pending block of a validator process
//!
//! The stager owns at most one pending block. Transactions are priced,
//! confirmed and appended to it; once it holds enough transactions and at
//! least one peer staked for the next round, the block is handed out for
//! emission. While an emission is in flight new transactions go to a
//! backlog that seeds the successor block.

use crate::{
    election::elect_next_validators,
    error::ConsensusError,
    types::{EmissionOutcome, NodeRole},
};
use stakechain_ledger::{price_transaction, Block, Transaction, ValidatorSet, EMISSION_THRESHOLD};

/// What happened to a submitted transaction
#[derive(Debug)]
pub enum Admission {
    /// Appended to the pending block
    Staged,
    /// Held until the in-flight emission completes
    Deferred,
    /// The local process is not a validator; the transaction is handed back
    NotValidator(Transaction),
}

/// Result of `BlockStager::trigger_block_emission`
#[derive(Debug)]
pub enum EmissionTrigger {
    /// Below the threshold, or no pending block
    NotReady,
    /// Threshold reached but nobody staked; the pending block is unchanged
    Skipped,
    /// Finished block to send to the chain store
    Ready(Block),
}

#[derive(Debug)]
enum StagerState {
    Idle,
    Staging(Block),
    Emitting { backlog: Vec<Transaction> },
}

pub struct BlockStager {
    peer_id: String,
    /// Validators allowed to produce the pending block
    validators: ValidatorSet,
    state: StagerState,
}

impl BlockStager {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            validators: ValidatorSet::new(),
            state: StagerState::Idle,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn set_validators(&mut self, validators: ValidatorSet) {
        self.validators = validators;
    }

    pub fn is_validator(&self) -> bool {
        self.validators.contains_key(&self.peer_id)
    }

    pub fn role(&self) -> NodeRole {
        if self.is_validator() {
            NodeRole::Validator
        } else {
            NodeRole::NonValidator
        }
    }

    pub fn pending(&self) -> Option<&Block> {
        match &self.state {
            StagerState::Staging(block) => Some(block),
            _ => None,
        }
    }

    pub fn is_emitting(&self) -> bool {
        matches!(self.state, StagerState::Emitting { .. })
    }

    /// Stage a fresh pending block on top of `tip`.
    ///
    /// Transactions already pending (staged or backlogged) move to the new
    /// block in their original order.
    pub fn stage_new_block(&mut self, tip: Option<&Block>) {
        let carried = self.take_pending();
        let mut block = Block::stage(
            tip.map(|b| (b.block_hash(), b.block_number())),
            self.validators.keys().cloned().collect(),
        );
        for tx in carried {
            block.add_transaction(tx);
        }

        tracing::info!(
            "Staged block {} on {:?} with {} carried transactions",
            block.block_number(),
            block.last_block_hash(),
            block.transactions().len()
        );
        self.state = StagerState::Staging(block);
    }

    /// Price, confirm and stage a transaction
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<Admission, ConsensusError> {
        if matches!(self.state, StagerState::Idle) {
            return Ok(Admission::NotValidator(tx));
        }

        let mut tx = price_transaction(tx);
        tx.confirm()?;
        tracing::debug!("Confirmed transaction {} from {}", tx.hash, tx.peer_id);

        match &mut self.state {
            StagerState::Staging(block) => {
                block.add_transaction(tx);
                Ok(Admission::Staged)
            }
            StagerState::Emitting { backlog } => {
                backlog.push(tx);
                Ok(Admission::Deferred)
            }
            StagerState::Idle => Ok(Admission::NotValidator(tx)),
        }
    }

    /// Hand out the pending block once it is ready for emission
    pub fn trigger_block_emission(&mut self) -> EmissionTrigger {
        let StagerState::Staging(block) = &mut self.state else {
            return EmissionTrigger::NotReady;
        };
        if block.transactions().len() < EMISSION_THRESHOLD {
            return EmissionTrigger::NotReady;
        }

        let next_validators = elect_next_validators(block.transactions());
        if next_validators.is_empty() {
            tracing::info!(
                "Block {} has {} transactions but no stake, skipping emission",
                block.block_number(),
                block.transactions().len()
            );
            return EmissionTrigger::Skipped;
        }

        block.header.validators = self.validators.keys().cloned().collect();
        block.header.next_validators = next_validators;

        match std::mem::replace(
            &mut self.state,
            StagerState::Emitting {
                backlog: Vec::new(),
            },
        ) {
            StagerState::Staging(block) => EmissionTrigger::Ready(block),
            other => {
                self.state = other;
                EmissionTrigger::NotReady
            }
        }
    }

    /// Fold the emission result back in.
    ///
    /// Accepted: the block's next validators become the current set; a
    /// member stages the successor seeded with the backlog, a non-member
    /// goes idle and gets the backlog back for forwarding. Otherwise the
    /// block is restored as pending with the backlog appended.
    pub fn on_emission_complete(
        &mut self,
        mut block: Block,
        outcome: &EmissionOutcome,
    ) -> Vec<Transaction> {
        let backlog = self.take_pending();

        match outcome {
            EmissionOutcome::Accepted { hash } => {
                block.seal(hash.clone());
                self.validators = block.next_validators().clone();
                self.state = StagerState::Emitting { backlog };

                if self.is_validator() {
                    self.stage_new_block(Some(&block));
                    Vec::new()
                } else {
                    tracing::info!(
                        "{} is not elected for block {}",
                        self.peer_id,
                        block.block_number().saturating_add(1)
                    );
                    self.take_pending()
                }
            }
            EmissionOutcome::Rejected(_) | EmissionOutcome::Failed(_) => {
                for tx in backlog {
                    block.add_transaction(tx);
                }
                block.header.next_validators.clear();
                self.state = StagerState::Staging(block);
                Vec::new()
            }
        }
    }

    /// Move the pending transactions onto a chain tip that changed under us.
    ///
    /// The tip's next validators become the current set. Returns the
    /// pending transactions when the local process is no longer elected.
    pub fn rebase(&mut self, tip: Option<&Block>) -> Vec<Transaction> {
        if let Some(tip) = tip {
            self.validators = tip.next_validators().clone();
        }
        if self.is_validator() {
            self.stage_new_block(tip);
            Vec::new()
        } else {
            self.take_pending()
        }
    }

    /// Drain pending transactions and go idle
    fn take_pending(&mut self) -> Vec<Transaction> {
        match std::mem::replace(&mut self.state, StagerState::Idle) {
            StagerState::Idle => Vec::new(),
            StagerState::Staging(block) => block.payload.transactions,
            StagerState::Emitting { backlog } => backlog,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakechain_ledger::{PeerAddress, TransactionKind};
    use stakechain_store::RejectReason;

    fn upload(peer: &str) -> Transaction {
        Transaction::new(
            peer,
            TransactionKind::Upload {
                filename: "a.txt".to_string(),
            },
        )
    }

    fn hold(peer: &str, stake: u64) -> Transaction {
        Transaction::new(
            peer,
            TransactionKind::HoldStake {
                stake,
                ip: "10.0.0.1".to_string(),
                port: 9000,
            },
        )
    }

    fn validator(peer: &str) -> BlockStager {
        let mut stager = BlockStager::new(peer);
        let mut set = ValidatorSet::new();
        set.insert(peer.to_string(), PeerAddress::new("127.0.0.1", 7000));
        stager.set_validators(set);
        stager.stage_new_block(None);
        stager
    }

    #[test]
    fn test_transactions_are_priced_and_confirmed() {
        let mut stager = validator("peer-a");
        assert!(matches!(
            stager.add_transaction(upload("peer-b")).unwrap(),
            Admission::Staged
        ));

        let tx = &stager.pending().unwrap().transactions()[0];
        assert!(tx.is_confirmed());
        assert_eq!((tx.fee, tx.cost, tx.reward), (1, 1, 5));
    }

    #[test]
    fn test_single_transaction_never_emits() {
        let mut stager = validator("peer-a");
        stager.add_transaction(hold("peer-b", 5)).unwrap();
        assert!(matches!(
            stager.trigger_block_emission(),
            EmissionTrigger::NotReady
        ));
    }

    #[test]
    fn test_two_transactions_with_stake_emit() {
        let mut stager = validator("peer-a");
        stager.add_transaction(upload("peer-b")).unwrap();
        stager.add_transaction(hold("peer-c", 3)).unwrap();

        let EmissionTrigger::Ready(block) = stager.trigger_block_emission() else {
            panic!("expected a ready block");
        };
        assert_eq!(block.header.validators, vec!["peer-a".to_string()]);
        assert!(block.next_validators().contains_key("peer-c"));
        assert!(stager.is_emitting());
        assert!(matches!(
            stager.trigger_block_emission(),
            EmissionTrigger::NotReady
        ));
    }

    #[test]
    fn test_no_stake_skips_and_keeps_block() {
        let mut stager = validator("peer-a");
        stager.add_transaction(upload("peer-b")).unwrap();
        stager.add_transaction(upload("peer-c")).unwrap();
        let before = stager.pending().unwrap().clone();

        assert!(matches!(
            stager.trigger_block_emission(),
            EmissionTrigger::Skipped
        ));
        assert_eq!(stager.pending(), Some(&before));
    }

    #[test]
    fn test_idle_stager_hands_transaction_back() {
        let mut stager = BlockStager::new("peer-a");
        let Admission::NotValidator(tx) = stager.add_transaction(upload("peer-b")).unwrap() else {
            panic!("expected the transaction back");
        };
        assert!(!tx.is_confirmed());
        assert_eq!(stager.role(), NodeRole::NonValidator);
    }

    #[test]
    fn test_accepted_emission_rearms_member() {
        let mut stager = validator("peer-a");
        stager.add_transaction(upload("peer-b")).unwrap();
        stager.add_transaction(hold("peer-a", 3)).unwrap();
        let EmissionTrigger::Ready(block) = stager.trigger_block_emission() else {
            panic!("expected a ready block");
        };

        assert!(matches!(
            stager.add_transaction(upload("peer-d")).unwrap(),
            Admission::Deferred
        ));

        let forward = stager.on_emission_complete(
            block,
            &EmissionOutcome::Accepted {
                hash: "ab".repeat(32),
            },
        );
        assert!(forward.is_empty());

        let successor = stager.pending().unwrap();
        assert_eq!(successor.block_number(), 2);
        assert_eq!(successor.last_block_hash(), "ab".repeat(32));
        assert_eq!(successor.transactions().len(), 1);
        assert_eq!(successor.payload.sequence, "12");
    }

    #[test]
    fn test_accepted_emission_retires_non_member() {
        let mut stager = validator("peer-a");
        stager.add_transaction(upload("peer-b")).unwrap();
        stager.add_transaction(hold("peer-c", 3)).unwrap();
        let EmissionTrigger::Ready(block) = stager.trigger_block_emission() else {
            panic!("expected a ready block");
        };
        stager.add_transaction(upload("peer-d")).unwrap();

        let forward = stager.on_emission_complete(
            block,
            &EmissionOutcome::Accepted {
                hash: "cd".repeat(32),
            },
        );
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].peer_id, "peer-d");
        assert!(!stager.is_validator());
        assert!(stager.validators().contains_key("peer-c"));
        assert!(stager.pending().is_none());
    }

    #[test]
    fn test_rejected_emission_restores_block() {
        let mut stager = validator("peer-a");
        stager.add_transaction(upload("peer-b")).unwrap();
        stager.add_transaction(hold("peer-c", 3)).unwrap();
        let EmissionTrigger::Ready(block) = stager.trigger_block_emission() else {
            panic!("expected a ready block");
        };
        stager.add_transaction(upload("peer-d")).unwrap();

        let outcome = EmissionOutcome::Rejected(RejectReason::Refused("Block Rejected".into()));
        assert!(stager.on_emission_complete(block, &outcome).is_empty());

        let restored = stager.pending().unwrap();
        assert_eq!(restored.block_number(), 1);
        assert_eq!(restored.transactions().len(), 3);
        assert!(restored.next_validators().is_empty());
    }

    #[test]
    fn test_rebase_moves_transactions_to_new_tip() {
        let mut stager = validator("peer-a");
        stager.add_transaction(upload("peer-b")).unwrap();

        let mut tip = Block::stage(None, vec![]);
        tip.header
            .next_validators
            .insert("peer-a".to_string(), PeerAddress::new("127.0.0.1", 7000));
        tip.seal("ef".repeat(32));

        assert!(stager.rebase(Some(&tip)).is_empty());
        let pending = stager.pending().unwrap();
        assert_eq!(pending.block_number(), 2);
        assert_eq!(pending.last_block_hash(), tip.block_hash());
        assert_eq!(pending.transactions().len(), 1);
    }
}

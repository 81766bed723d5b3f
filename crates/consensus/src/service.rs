//! Consensus service - stages submissions and emits blocks
//!
//! Emitted blocks are gossiped through the fan-out, and blocks other
//! validators emit reach the stager through the network validator, so the
//! process always stages on top of the newest tip it knows.

use crate::{
    bootstrap::{bootstrap, GenesisElection},
    error::ConsensusError,
    stager::{Admission, BlockStager, EmissionTrigger},
    types::{ConsensusConfig, ConsensusStats, EmissionOutcome, NodeRole},
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use stakechain_ledger::{
    wire::{self, Envelope, SubmissionAck},
    Block, PeerAddress, Submission, Transaction,
};
use stakechain_network::{ChainListener, Fanout, FanoutReport};
use stakechain_store::{AddBlockOutcome, ChainBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Validator-side consensus state: the block stager plus its emission task
pub struct ConsensusService {
    pub(crate) config: ConsensusConfig,
    stager: Mutex<BlockStager>,
    backend: Arc<dyn ChainBackend>,
    /// Gossips accepted blocks to the peer set
    fanout: Option<Arc<Fanout>>,
    /// Most recently spawned emission
    emission: Mutex<Option<JoinHandle<EmissionOutcome>>>,
    /// Broadcast cycle of the most recent accepted emission
    broadcast: Mutex<Option<JoinHandle<FanoutReport>>>,
    stats: RwLock<ConsensusStats>,
}

impl ConsensusService {
    pub fn new(
        config: ConsensusConfig,
        backend: Arc<dyn ChainBackend>,
        fanout: Option<Arc<Fanout>>,
    ) -> Self {
        Self {
            stager: Mutex::new(BlockStager::new(config.peer_id.clone())),
            config,
            backend,
            fanout,
            emission: Mutex::new(None),
            broadcast: Mutex::new(None),
            stats: RwLock::new(ConsensusStats::default()),
        }
    }

    /// Derive the validator set from the chain and stage the first block
    pub async fn bootstrap(&self, genesis: &dyn GenesisElection) -> Result<NodeRole, ConsensusError> {
        let mut stager = BlockStager::new(self.config.peer_id.clone());
        let role = bootstrap(&mut stager, self.backend.as_ref(), genesis).await?;
        *self.stager.lock() = stager;
        Ok(role)
    }

    /// Handle a client submission.
    ///
    /// Validators stage the transaction and may start an emission; the
    /// caller does not wait for it. Non-validators forward the submission to
    /// the current validator set and relay the first acknowledgement.
    pub async fn submit(
        self: &Arc<Self>,
        code: i64,
        submission: Submission,
    ) -> Result<SubmissionAck, ConsensusError> {
        let tx = Transaction::from_submission(code, &submission)?;
        let relayed = submission.forwarded;

        let (admission, trigger) = {
            let mut stager = self.stager.lock();
            let admission = stager.add_transaction(tx)?;
            let trigger = match admission {
                Admission::Staged => stager.trigger_block_emission(),
                _ => EmissionTrigger::NotReady,
            };
            (admission, trigger)
        };

        match admission {
            Admission::NotValidator(_) if relayed => {
                tracing::warn!(
                    "Refusing relayed transaction: {} is not a validator",
                    self.config.peer_id
                );
                return Err(ConsensusError::NotElected(self.config.peer_id.clone()));
            }
            Admission::NotValidator(tx) => return self.forward(tx).await,
            Admission::Staged | Admission::Deferred => {
                self.stats.write().transactions_staged += 1;
            }
        }

        self.handle_trigger(trigger);
        Ok(SubmissionAck::submitted())
    }

    fn handle_trigger(self: &Arc<Self>, trigger: EmissionTrigger) {
        match trigger {
            EmissionTrigger::Ready(block) => self.spawn_emission(block),
            EmissionTrigger::Skipped => self.stats.write().emissions_skipped += 1,
            EmissionTrigger::NotReady => {}
        }
    }

    fn spawn_emission(self: &Arc<Self>, block: Block) {
        tracing::info!(
            "Emitting block {} with {} transactions",
            block.block_number(),
            block.transactions().len()
        );
        let mut slot = self.emission.lock();
        let service = self.clone();
        *slot = Some(tokio::spawn(async move { service.emit(block).await }));
    }

    /// Send a finished block to the chain store and fold the result back in
    async fn emit(self: Arc<Self>, block: Block) -> EmissionOutcome {
        let number = block.block_number();
        let outcome = match self.backend.add_block(block.clone()).await {
            Ok(AddBlockOutcome::Accepted { hash }) => EmissionOutcome::Accepted { hash },
            Ok(AddBlockOutcome::Rejected(reason)) => EmissionOutcome::Rejected(reason),
            Err(e) => EmissionOutcome::Failed(e.to_string()),
        };

        let mut sealed = None;
        match &outcome {
            EmissionOutcome::Accepted { hash } => {
                tracing::info!("Block {} accepted: {}", number, hash);
                self.stats.write().blocks_emitted += 1;
                let mut block = block.clone();
                block.seal(hash.clone());
                sealed = Some(block);
            }
            EmissionOutcome::Rejected(reason) => {
                tracing::warn!("Block {} rejected: {:?}", number, reason);
                self.stats.write().blocks_rejected += 1;
            }
            EmissionOutcome::Failed(reason) => {
                tracing::error!("Block {} emission failed: {}", number, reason);
                self.stats.write().emissions_failed += 1;
            }
        }

        // A rejected block was built on a stale tip
        let resync = match &outcome {
            EmissionOutcome::Rejected(_) => match self.backend.tip().await {
                Ok(tip) => Some(tip),
                Err(e) => {
                    tracing::warn!("Failed to re-read chain tip: {}", e);
                    None
                }
            },
            _ => None,
        };

        let (forward, trigger) = {
            let mut stager = self.stager.lock();
            let mut forward = stager.on_emission_complete(block, &outcome);
            if let Some(tip) = &resync {
                forward.extend(stager.rebase(tip.as_ref()));
            }
            let trigger = if outcome.is_accepted() {
                stager.trigger_block_emission()
            } else {
                EmissionTrigger::NotReady
            };
            (forward, trigger)
        };

        if let Some(block) = sealed {
            self.gossip(block).await;
        }

        if !forward.is_empty() {
            // The new validators learn about the block before its backlog
            let broadcast = self.broadcast.lock().take();
            if let Some(handle) = broadcast {
                if let Err(e) = handle.await {
                    tracing::warn!("Broadcast task failed: {}", e);
                }
            }
        }
        for tx in forward {
            if let Err(e) = self.forward(tx).await {
                tracing::warn!("Dropping backlogged transaction: {}", e);
            }
        }
        self.handle_trigger(trigger);

        outcome
    }

    /// Hand an accepted block to the fan-out and start a broadcast cycle
    async fn gossip(&self, block: Block) {
        let Some(fanout) = &self.fanout else {
            return;
        };
        fanout.stage_block(block);
        match fanout.start_pool().await {
            Ok(handle) => *self.broadcast.lock() = Some(handle),
            Err(e) => tracing::warn!("Fan-out not started: {}", e),
        }
    }

    /// Await the broadcast of the most recent accepted emission, if any
    pub async fn wait_for_broadcast(&self) -> Option<FanoutReport> {
        let handle = self.broadcast.lock().take()?;
        handle.await.ok()
    }

    /// Forward a transaction to every known validator
    async fn forward(&self, tx: Transaction) -> Result<SubmissionAck, ConsensusError> {
        let validators: Vec<(String, PeerAddress)> = self
            .stager
            .lock()
            .validators()
            .iter()
            .map(|(peer, addr)| (peer.clone(), addr.clone()))
            .collect();
        if validators.is_empty() {
            return Err(ConsensusError::NoValidators);
        }

        let (code, mut submission) = tx.to_submission();
        submission.forwarded = true;
        let envelope = Envelope::new(code.as_i64(), &submission)?;

        let mut ack = None;
        for (peer_id, address) in validators {
            if peer_id == self.config.peer_id {
                continue;
            }
            match wire::request::<_, SubmissionAck>(
                &address.socket_addr(),
                &envelope,
                self.config.request_timeout,
            )
            .await
            {
                Ok(response) => {
                    tracing::debug!("Forwarded transaction to {}", peer_id);
                    ack.get_or_insert(response);
                }
                Err(e) => {
                    tracing::warn!("Failed to forward transaction to {}: {}", peer_id, e);
                }
            }
        }

        self.stats.write().transactions_forwarded += 1;
        ack.ok_or(ConsensusError::ForwardFailed)
    }

    /// Await the most recently spawned emission, if any
    pub async fn wait_for_emission(&self) -> Option<EmissionOutcome> {
        let handle = self.emission.lock().take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!("Emission task failed: {}", e);
                None
            }
        }
    }

    pub fn role(&self) -> NodeRole {
        self.stager.lock().role()
    }

    /// Snapshot of the pending block
    pub fn pending_block(&self) -> Option<Block> {
        self.stager.lock().pending().cloned()
    }

    pub fn validators(&self) -> Vec<String> {
        self.stager.lock().validators().keys().cloned().collect()
    }

    pub fn stats(&self) -> ConsensusStats {
        self.stats.read().clone()
    }
}

#[async_trait]
impl ChainListener for ConsensusService {
    /// Move the stager onto a block another validator emitted. The block's
    /// next validators decide whether this process stages its successor.
    async fn on_block_accepted(&self, block: &Block) {
        let forward = {
            let mut stager = self.stager.lock();
            if stager.is_emitting() {
                // The emission outcome decides where the stager goes next
                tracing::debug!("Emission in flight, not following block {}", block.block_number());
                return;
            }
            if stager
                .pending()
                .is_some_and(|pending| pending.last_block_hash() == block.block_hash())
            {
                return;
            }
            tracing::info!(
                "Following block {} from the network",
                block.block_number()
            );
            stager.rebase(Some(block))
        };
        self.stats.write().blocks_followed += 1;

        for tx in forward {
            if let Err(e) = self.forward(tx).await {
                tracing::warn!("Dropping pending transaction: {}", e);
            }
        }
    }
}

/// Builder for ConsensusService
pub struct ConsensusServiceBuilder {
    config: ConsensusConfig,
    fanout: Option<Arc<Fanout>>,
}

impl ConsensusServiceBuilder {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            config: ConsensusConfig {
                peer_id: peer_id.into(),
                ..ConsensusConfig::default()
            },
            fanout: None,
        }
    }

    /// Gossip accepted blocks through this fan-out
    pub fn fanout(mut self, fanout: Arc<Fanout>) -> Self {
        self.fanout = Some(fanout);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_inflight_messages(mut self, capacity: usize) -> Self {
        self.config.max_inflight_messages = capacity.max(1);
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers.max(1);
        self
    }

    pub fn build(self, backend: Arc<dyn ChainBackend>) -> ConsensusService {
        ConsensusService::new(self.config, backend, self.fanout)
    }
}

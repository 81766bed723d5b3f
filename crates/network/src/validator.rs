//! Network validator - checks blocks proposed by remote validators
//!
//! The validator keeps a cached view of the chain tip. A proposed block must
//! link to that tip by hash and number before it is forwarded to the chain
//! store. The chain store stays the source of truth: whenever a decision
//! would be made against a stale cache, the tip is re-read once first.

use crate::{
    codes::OptCode,
    error::NetworkError,
    fanout::{Fanout, FanoutReport},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use stakechain_ledger::Block;
use stakechain_store::{AddBlockOutcome, ChainBackend};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Told about every block persisted through the network validator
#[async_trait]
pub trait ChainListener: Send + Sync {
    async fn on_block_accepted(&self, block: &Block);
}

pub struct NetworkValidator {
    backend: Arc<dyn ChainBackend>,
    fanout: Arc<Fanout>,
    listener: Mutex<Option<Arc<dyn ChainListener>>>,
    /// Cached chain tip
    known_tip: Mutex<Option<Block>>,
    /// Most recent broadcast cycle
    broadcast: Mutex<Option<JoinHandle<FanoutReport>>>,
}

impl NetworkValidator {
    pub fn new(backend: Arc<dyn ChainBackend>, fanout: Arc<Fanout>) -> Self {
        Self {
            backend,
            fanout,
            listener: Mutex::new(None),
            known_tip: Mutex::new(None),
            broadcast: Mutex::new(None),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn ChainListener>) {
        *self.listener.lock() = Some(listener);
    }

    pub fn backend(&self) -> &Arc<dyn ChainBackend> {
        &self.backend
    }

    /// Load the tip from the chain store
    pub async fn sync_tip(&self) -> Result<Option<Block>, NetworkError> {
        let tip = self.backend.tip().await?;
        tracing::debug!(
            "Synced tip to block {:?}",
            tip.as_ref().map(|b| b.block_number())
        );
        *self.known_tip.lock() = tip.clone();
        Ok(tip)
    }

    pub fn known_tip(&self) -> Option<Block> {
        self.known_tip.lock().clone()
    }

    /// Validate a proposed block and, if the chain store accepts it, queue it
    /// for fan-out.
    pub async fn on_incoming_block(&self, block: Block) -> Result<OptCode, NetworkError> {
        let cached = self.known_tip();
        let mut resynced = false;

        let mut verdict = check_link(cached.as_ref(), &block);
        if verdict.is_some() {
            let tip = self.sync_tip().await?;
            resynced = true;
            verdict = check_link(tip.as_ref(), &block);
        }
        if let Some(code) = verdict {
            tracing::info!(
                "Rejecting proposed block {}: {}",
                block.block_number(),
                code.name()
            );
            return Ok(code);
        }

        let outcome = match self.backend.add_block(block.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Chain store unavailable for block {}: {}", block.block_number(), e);
                return Ok(OptCode::RejectedDataLayerNotAccepted);
            }
        };

        match outcome {
            AddBlockOutcome::Accepted { hash } => {
                let mut accepted = block;
                accepted.seal(hash);
                tracing::info!(
                    "Accepted proposed block {}: {}",
                    accepted.block_number(),
                    accepted.block_hash()
                );
                *self.known_tip.lock() = Some(accepted.clone());
                self.fanout.stage_block(accepted.clone());
                self.start_broadcast().await;

                let listener = self.listener.lock().clone();
                if let Some(listener) = listener {
                    listener.on_block_accepted(&accepted).await;
                }
                Ok(OptCode::AcceptedAndForward)
            }
            AddBlockOutcome::Rejected(reason) => {
                tracing::info!("Chain store rejected block {}: {:?}", block.block_number(), reason);
                if !resynced {
                    let tip = self.sync_tip().await?;
                    if let Some(code) = check_link(tip.as_ref(), &block) {
                        return Ok(code);
                    }
                }
                Ok(OptCode::RejectedDataLayerNotAccepted)
            }
        }
    }

    async fn start_broadcast(&self) {
        match self.fanout.start_pool().await {
            Ok(handle) => *self.broadcast.lock() = Some(handle),
            Err(e) => tracing::warn!("Fan-out not started: {}", e),
        }
    }

    /// Await the most recent broadcast cycle, if any
    pub async fn wait_for_broadcast(&self) -> Option<FanoutReport> {
        let handle = self.broadcast.lock().take()?;
        handle.await.ok()
    }
}

/// Rejection code if `block` does not extend `tip`. An empty chain accepts
/// anything and leaves the decision to the chain store.
fn check_link(tip: Option<&Block>, block: &Block) -> Option<OptCode> {
    let tip = tip?;
    if block.last_block_hash() != tip.block_hash() {
        return Some(OptCode::RejectedInvalidChainConnection);
    }
    if tip.block_number().checked_add(1) != Some(block.block_number()) {
        return Some(OptCode::RejectedInvalidBlockNumber);
    }
    None
}

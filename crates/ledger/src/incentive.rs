//! Incentive calculator
//!
//! Aggregates a peer's persisted transactions into a balance. Every peer
//! starts with `INITIAL_BALANCE`; rewards are credited, costs and fees are
//! debited.

use crate::block::Block;

/// Balance credited to every peer before any transaction
pub const INITIAL_BALANCE: i64 = 5;

/// Per-peer totals over the chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerAccount {
    pub transactions: usize,
    pub total_cost: i64,
    pub total_fee: i64,
    pub total_reward: i64,
}

impl PeerAccount {
    /// Collect the totals for `peer_id`
    pub fn collect<'a>(blocks: impl IntoIterator<Item = &'a Block>, peer_id: &str) -> Self {
        let mut account = Self::default();
        for tx in blocks
            .into_iter()
            .flat_map(|block| block.transactions())
            .filter(|tx| tx.peer_id == peer_id)
        {
            account.transactions += 1;
            account.total_cost += tx.cost;
            account.total_fee += tx.fee;
            account.total_reward += tx.reward;
        }
        account
    }

    pub fn balance(&self) -> i64 {
        INITIAL_BALANCE + self.total_reward - (self.total_cost + self.total_fee)
    }
}

/// Current balance of `peer_id`
pub fn peer_balance<'a>(blocks: impl IntoIterator<Item = &'a Block>, peer_id: &str) -> i64 {
    PeerAccount::collect(blocks, peer_id).balance()
}

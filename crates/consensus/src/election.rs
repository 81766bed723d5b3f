//! Next-validator election
//!
//! Candidates are the hold-stake transactions of the pending block with a
//! nonzero stake, ranked by stake descending. The sort is stable so equal
//! stakes keep submission order. The cap applies to bids, not peers: a peer
//! bidding twice in the top five takes two seats in the ranking and one
//! entry in the elected set, so fewer than five validators may be elected.

use stakechain_ledger::{PeerAddress, Transaction, TransactionKind, ValidatorSet, MAX_NEXT_VALIDATORS};

/// A ranked hold-stake bid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub peer_id: String,
    pub stake: u64,
    pub address: PeerAddress,
}

/// Rank the bids in `transactions`, best first, at most `MAX_NEXT_VALIDATORS`.
/// Repeated bids of one peer are kept.
pub fn rank_candidates(transactions: &[Transaction]) -> Vec<Candidate> {
    let mut bids: Vec<Candidate> = transactions
        .iter()
        .filter_map(|tx| match &tx.kind {
            TransactionKind::HoldStake { stake, ip, port } if *stake > 0 => Some(Candidate {
                peer_id: tx.peer_id.clone(),
                stake: *stake,
                address: PeerAddress::new(ip.clone(), *port),
            }),
            _ => None,
        })
        .collect();
    bids.sort_by(|a, b| b.stake.cmp(&a.stake));
    bids.truncate(MAX_NEXT_VALIDATORS);
    bids
}

/// Elected validators keyed by peer id. Empty when nobody staked. When a
/// peer holds several ranked bids, the lowest ranked one sets its address.
pub fn elect_next_validators(transactions: &[Transaction]) -> ValidatorSet {
    rank_candidates(transactions)
        .into_iter()
        .map(|c| (c.peer_id, c.address))
        .collect()
}

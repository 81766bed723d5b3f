//! Fan-out broadcaster (FBE)
//!
//! Accepted blocks are queued and pushed to every peer's network endpoint.
//! Each broadcast cycle drains the queue into one read-only batch, splits a
//! snapshot of the peer directory into shards and runs one worker per shard.
//! Delivery is best effort: no retry, and an unreachable peer only costs its
//! own timeout.

use crate::{codes::RequestType, directory::PeerDirectory, error::NetworkError};
use parking_lot::Mutex;
use stakechain_ledger::{
    wire::{self, ProposalRequest, ProposalResponse},
    Block, PeerAddress,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

pub const DEFAULT_SHARD_SIZE: usize = 50;
pub const DEFAULT_MAX_OUTBOUND: usize = 64;

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Local peer, never sent to
    pub peer_id: String,
    /// Peers per worker
    pub shard_size: usize,
    /// Concurrent outbound connections per cycle
    pub max_outbound: usize,
    pub request_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            peer_id: String::new(),
            shard_size: DEFAULT_SHARD_SIZE,
            max_outbound: DEFAULT_MAX_OUTBOUND,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of one broadcast cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub blocks: usize,
    pub peers: usize,
    pub shards: usize,
    /// Block sends answered by the peer
    pub delivered: usize,
    pub failed: usize,
}

pub struct Fanout {
    config: FanoutConfig,
    directory: Arc<dyn PeerDirectory>,
    queue: Mutex<Vec<Block>>,
}

impl Fanout {
    pub fn new(config: FanoutConfig, directory: Arc<dyn PeerDirectory>) -> Self {
        Self {
            config,
            directory,
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Queue a block for the next cycle
    pub fn stage_block(&self, block: Block) {
        self.queue.lock().push(block);
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Start a broadcast cycle over the queued blocks.
    ///
    /// The returned handle resolves once every shard worker is done. If the
    /// directory cannot be read the blocks stay queued.
    pub async fn start_pool(&self) -> Result<JoinHandle<FanoutReport>, NetworkError> {
        let peers = match self.directory.peers().await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("Peer directory unavailable, keeping {} blocks queued", self.queued());
                return Err(e);
            }
        };

        let batch: Arc<Vec<Block>> = Arc::new(std::mem::take(&mut *self.queue.lock()));
        let peers: Vec<(String, PeerAddress)> = peers
            .into_iter()
            .filter(|(peer_id, _)| *peer_id != self.config.peer_id)
            .collect();
        let shards: Vec<Vec<(String, PeerAddress)>> = peers
            .chunks(self.config.shard_size.max(1))
            .map(|shard| shard.to_vec())
            .collect();

        let mut report = FanoutReport {
            blocks: batch.len(),
            peers: peers.len(),
            shards: shards.len(),
            ..FanoutReport::default()
        };
        tracing::info!(
            "Broadcasting {} blocks to {} peers in {} shards",
            report.blocks,
            report.peers,
            report.shards
        );

        let permits = Arc::new(Semaphore::new(self.config.max_outbound.max(1)));
        let timeout = self.config.request_timeout;

        Ok(tokio::spawn(async move {
            if batch.is_empty() {
                return report;
            }

            let mut workers = JoinSet::new();
            for shard in shards {
                workers.spawn(broadcast_shard(shard, batch.clone(), permits.clone(), timeout));
            }

            while let Some(result) = workers.join_next().await {
                match result {
                    Ok((delivered, failed)) => {
                        report.delivered += delivered;
                        report.failed += failed;
                    }
                    Err(e) => tracing::error!("Fan-out worker failed: {}", e),
                }
            }

            tracing::info!(
                "Broadcast done: {} delivered, {} failed",
                report.delivered,
                report.failed
            );
            report
        }))
    }
}

/// Send every block of the batch to every peer of the shard
async fn broadcast_shard(
    shard: Vec<(String, PeerAddress)>,
    batch: Arc<Vec<Block>>,
    permits: Arc<Semaphore>,
    timeout: Duration,
) -> (usize, usize) {
    let mut delivered = 0;
    let mut failed = 0;

    for (peer_id, address) in &shard {
        let addr = address.socket_addr();
        for block in batch.iter() {
            let request = match serde_json::to_value(block) {
                Ok(data) => ProposalRequest {
                    request_type: RequestType::IncomingBlock.as_i64(),
                    request_data: data,
                },
                Err(e) => {
                    tracing::error!("Failed to serialize block {}: {}", block.block_number(), e);
                    failed += 1;
                    continue;
                }
            };

            let Ok(_permit) = permits.acquire().await else {
                failed += 1;
                continue;
            };
            match wire::request::<_, ProposalResponse>(&addr, &request, timeout).await {
                Ok(response) => {
                    tracing::debug!(
                        "Peer {} answered block {} with {}",
                        peer_id,
                        block.block_number(),
                        response.msg
                    );
                    delivered += 1;
                }
                Err(e) => {
                    tracing::debug!("Failed to send block to {} at {}: {}", peer_id, addr, e);
                    failed += 1;
                }
            }
        }
    }

    (delivered, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticPeerDirectory;
    use stakechain_ledger::ValidatorSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::BufReader;
    use tokio::net::TcpListener;

    /// Peer endpoint counting received blocks
    async fn spawn_peer(received: Arc<AtomicUsize>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let received = received.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    let request: ProposalRequest =
                        wire::read_message(&mut reader).await.unwrap().unwrap();
                    assert_eq!(request.request_type, 1);
                    received.fetch_add(1, Ordering::SeqCst);
                    let response = ProposalResponse {
                        opt_code: 1,
                        msg: "ACCEPTED_AND_FORWARD".to_string(),
                        payload: None,
                    };
                    wire::write_message(&mut write_half, &response).await.unwrap();
                });
            }
        });
        port
    }

    fn config(peer_id: &str, shard_size: usize) -> FanoutConfig {
        FanoutConfig {
            peer_id: peer_id.to_string(),
            shard_size,
            max_outbound: 4,
            request_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_batch_reaches_every_shard() {
        let received = Arc::new(AtomicUsize::new(0));
        let mut peers = ValidatorSet::new();
        for i in 0..5 {
            let port = spawn_peer(received.clone()).await;
            peers.insert(format!("peer-{}", i), PeerAddress::new("127.0.0.1", port));
        }
        // The local peer is skipped even though it is listed
        peers.insert("me".to_string(), PeerAddress::new("127.0.0.1", 1));

        let fanout = Fanout::new(config("me", 2), Arc::new(StaticPeerDirectory::new(peers)));
        fanout.stage_block(Block::stage(None, vec![]));
        fanout.stage_block(Block::stage(Some(("ab", 1)), vec![]));

        let report = fanout.start_pool().await.unwrap().await.unwrap();
        assert_eq!(report.blocks, 2);
        assert_eq!(report.peers, 5);
        assert_eq!(report.shards, 3);
        assert_eq!(report.delivered, 10);
        assert_eq!(report.failed, 0);
        assert_eq!(received.load(Ordering::SeqCst), 10);
        assert_eq!(fanout.queued(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_peer_does_not_block_others() {
        let received = Arc::new(AtomicUsize::new(0));
        let live = spawn_peer(received.clone()).await;

        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut peers = ValidatorSet::new();
        peers.insert("dead".to_string(), PeerAddress::new("127.0.0.1", dead));
        peers.insert("live".to_string(), PeerAddress::new("127.0.0.1", live));

        let fanout = Fanout::new(config("me", 1), Arc::new(StaticPeerDirectory::new(peers)));
        fanout.stage_block(Block::stage(None, vec![]));

        let report = fanout.start_pool().await.unwrap().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_sends_nothing() {
        let mut peers = ValidatorSet::new();
        peers.insert("peer-a".to_string(), PeerAddress::new("127.0.0.1", 1));
        let fanout = Fanout::new(config("me", 50), Arc::new(StaticPeerDirectory::new(peers)));

        let report = fanout.start_pool().await.unwrap().await.unwrap();
        assert_eq!(report.blocks, 0);
        assert_eq!(report.delivered + report.failed, 0);
    }
}

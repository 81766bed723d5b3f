//! Network TCP endpoint - block proposals and chain requests from peers

use crate::{
    codes::{OptCode, RequestType},
    error::NetworkError,
    validator::NetworkValidator,
};
use stakechain_ledger::{
    wire::{self, ProposalRequest, ProposalResponse},
    Block,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

pub struct NetworkService {
    validator: Arc<NetworkValidator>,
    idle_timeout: Duration,
}

impl NetworkService {
    pub fn new(validator: Arc<NetworkValidator>, idle_timeout: Duration) -> Self {
        Self {
            validator,
            idle_timeout,
        }
    }

    pub fn validator(&self) -> &Arc<NetworkValidator> {
        &self.validator
    }

    /// Bind and serve peers
    pub async fn run(self: Arc<Self>, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Network service listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            tracing::debug!("Network connection from {}", peer_addr);

            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.handle_connection(stream).await {
                    tracing::warn!("Network connection from {} closed: {}", peer_addr, e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> anyhow::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let next = tokio::time::timeout(self.idle_timeout, wire::read_message(&mut reader)).await;
            let request: ProposalRequest = match next {
                Err(_) => {
                    tracing::debug!("Network connection idle, closing");
                    return Ok(());
                }
                Ok(Ok(None)) => return Ok(()),
                Ok(Ok(Some(request))) => request,
                Ok(Err(e)) => return Err(e.into()),
            };

            if request.is_close() {
                return Ok(());
            }

            let response = self.handle(request).await?;
            wire::write_message(&mut write_half, &response).await?;
        }
    }

    /// Answer one request
    pub async fn handle(&self, request: ProposalRequest) -> Result<ProposalResponse, NetworkError> {
        match RequestType::try_from(request.request_type)? {
            RequestType::IncomingBlock => {
                let block: Block = serde_json::from_value(request.request_data)?;
                let code = self.validator.on_incoming_block(block).await?;
                Ok(response(code, None))
            }
            RequestType::Blockchain => {
                let chain = self.validator.backend().chain().await?;
                Ok(response(
                    OptCode::SendingSerializedBlockchain,
                    Some(serde_json::to_value(chain)?),
                ))
            }
        }
    }
}

fn response(code: OptCode, payload: Option<serde_json::Value>) -> ProposalResponse {
    ProposalResponse {
        opt_code: code.as_i64(),
        msg: code.name().to_string(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        directory::StaticPeerDirectory,
        fanout::{Fanout, FanoutConfig},
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use stakechain_ledger::{PeerAddress, ValidatorSet};
    use stakechain_store::{ChainStore, ChainStoreConfig, LocalChainBackend};
    use tempfile::{tempdir, TempDir};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    /// A peer with its own chain store and network endpoint
    async fn spawn_node(peer_id: &str, peers: ValidatorSet) -> (TempDir, Arc<NetworkService>, u16) {
        let dir = tempdir().unwrap();
        let store = Arc::new(Mutex::new(
            ChainStore::open(ChainStoreConfig::new(dir.path())).unwrap(),
        ));
        let fanout = Arc::new(Fanout::new(
            FanoutConfig {
                peer_id: peer_id.to_string(),
                ..FanoutConfig::default()
            },
            Arc::new(StaticPeerDirectory::new(peers)),
        ));
        let validator = Arc::new(NetworkValidator::new(
            Arc::new(LocalChainBackend::new(store)),
            fanout,
        ));
        validator.sync_tip().await.unwrap();

        let service = Arc::new(NetworkService::new(validator, Duration::from_secs(5)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(service.clone().serve(listener));
        (dir, service, port)
    }

    fn propose(block: &Block) -> ProposalRequest {
        ProposalRequest {
            request_type: RequestType::IncomingBlock.as_i64(),
            request_data: serde_json::to_value(block).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_accepted_block_is_replicated() {
        let (_far_dir, far, far_port) = spawn_node("far", ValidatorSet::new()).await;

        let mut peers = ValidatorSet::new();
        peers.insert("far".to_string(), PeerAddress::new("127.0.0.1", far_port));
        let (_near_dir, near, near_port) = spawn_node("near", peers).await;

        let addr = format!("127.0.0.1:{}", near_port);
        let response: ProposalResponse =
            wire::request(&addr, &propose(&Block::stage(None, vec![])), Duration::from_secs(5))
                .await
                .unwrap();
        assert_eq!(response.opt_code, 1);
        assert_eq!(response.msg, "ACCEPTED_AND_FORWARD");

        let report = near.validator().wait_for_broadcast().await.unwrap();
        assert_eq!(report.delivered, 1);

        let near_tip = near.validator().known_tip().unwrap();
        let far_tip = far.validator().known_tip().unwrap();
        assert_eq!(near_tip.block_hash(), far_tip.block_hash());
    }

    #[tokio::test]
    async fn test_chain_request_relays_payload() {
        let (_dir, node, port) = spawn_node("near", ValidatorSet::new()).await;
        node.validator()
            .on_incoming_block(Block::stage(None, vec![]))
            .await
            .unwrap();

        let request = ProposalRequest {
            request_type: RequestType::Blockchain.as_i64(),
            request_data: serde_json::Value::Null,
        };
        let addr = format!("127.0.0.1:{}", port);
        let response: ProposalResponse = wire::request(&addr, &request, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(response.opt_code, 2);
        let chain: Vec<Block> = serde_json::from_value(response.payload.unwrap()).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].block_number(), 1);
    }

    #[tokio::test]
    async fn test_rejection_code_on_the_wire() {
        let (_dir, node, port) = spawn_node("near", ValidatorSet::new()).await;
        node.validator()
            .on_incoming_block(Block::stage(None, vec![]))
            .await
            .unwrap();

        let stray = Block::stage(Some(("feed", 1)), vec![]);
        let addr = format!("127.0.0.1:{}", port);
        let response: ProposalResponse = wire::request(&addr, &propose(&stray), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.opt_code, -4);
        assert_eq!(response.msg, "REJECTED_INVALID_CHAIN_CONNECTION");
        assert!(response.payload.is_none());
    }

    #[tokio::test]
    async fn test_close_sentinel_ends_connection() {
        let (_dir, _node, port) = spawn_node("near", ValidatorSet::new()).await;

        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let chain_request = ProposalRequest {
            request_type: RequestType::Blockchain.as_i64(),
            request_data: serde_json::Value::Null,
        };
        wire::write_message(&mut write_half, &chain_request).await.unwrap();
        let response: ProposalResponse = wire::read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(response.opt_code, 2);

        let close = ProposalRequest {
            request_type: wire::CLOSE_CONNECTION,
            request_data: serde_json::Value::Null,
        };
        wire::write_message(&mut write_half, &close).await.unwrap();
        let mut buf = String::new();
        assert_eq!(reader.read_line(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_block_closes_connection() {
        let (_dir, _node, port) = spawn_node("near", ValidatorSet::new()).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let line = format!("{}\n", json!({ "request_type": 1, "request_data": { "oops": true } }));
        stream.write_all(line.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(stream);
        let mut buf = String::new();
        assert_eq!(reader.read_line(&mut buf).await.unwrap(), 0);
    }
}

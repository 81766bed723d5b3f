//! Data-layer service
//!
//! Serves chunk and chain reads and accepts new blocks over newline-delimited
//! JSON. A connection may carry many requests and ends on EOF, on the close
//! sentinel, on a malformed request or after the idle timeout.

use crate::{
    error::RequestError,
    protocol::DataMessageType,
    store::{AddBlockOutcome, ChainStore},
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use stakechain_ledger::{
    wire::{self, DataResponse, Envelope},
    Block,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

/// Data-layer TCP endpoint
pub struct DataService {
    store: Arc<Mutex<ChainStore>>,
    idle_timeout: Duration,
}

impl DataService {
    pub fn new(store: Arc<Mutex<ChainStore>>, idle_timeout: Duration) -> Self {
        Self {
            store,
            idle_timeout,
        }
    }

    /// Bind and serve until the listener fails
    pub async fn run(self: Arc<Self>, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Data service listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            tracing::debug!("Data connection from {}", peer_addr);

            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.handle_connection(stream).await {
                    tracing::warn!("Data connection from {} closed: {}", peer_addr, e);
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> anyhow::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let next = tokio::time::timeout(self.idle_timeout, wire::read_message(&mut reader)).await;
            let envelope: Envelope = match next {
                Err(_) => {
                    tracing::debug!("Data connection idle, closing");
                    return Ok(());
                }
                Ok(Ok(None)) => return Ok(()),
                Ok(Ok(Some(envelope))) => envelope,
                Ok(Err(e)) => return Err(e.into()),
            };

            if envelope.is_close() {
                return Ok(());
            }

            // Appends flush the active chunk under the store lock
            let service = self.clone();
            let response = tokio::task::spawn_blocking(move || service.handle(envelope)).await??;
            wire::write_message(&mut write_half, &response).await?;
        }
    }

    /// Answer a single request
    pub fn handle(&self, envelope: Envelope) -> Result<DataResponse, RequestError> {
        let action = envelope.message_type;
        let message_type = DataMessageType::try_from(action)?;
        tracing::debug!("Data request {:?}", message_type);

        let response = match message_type {
            DataMessageType::SendChunk => {
                let name = envelope
                    .message_data
                    .get("chunkFilename")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let store = self.store.lock();
                match store.chunk(name) {
                    Some(chunk) => chunk_response(action, serde_json::to_value(chunk)?),
                    None => missing_chunk_response(action),
                }
            }

            DataMessageType::SendChain => {
                let store = self.store.lock();
                let blocks: Vec<&Block> = store.blocks().collect();
                DataResponse {
                    action,
                    result: serde_json::to_value(blocks)?,
                    message: "Sending chain".to_string(),
                    hash: None,
                }
            }

            DataMessageType::SendLastChunk => {
                let store = self.store.lock();
                match store.last_chunk() {
                    Some(chunk) => chunk_response(action, serde_json::to_value(chunk)?),
                    None => missing_chunk_response(action),
                }
            }

            DataMessageType::AddBlock => {
                let block: Block = serde_json::from_value(envelope.message_data)?;
                tracing::info!("Adding block {} from data request", block.block_number());
                match self.store.lock().add_block(block)? {
                    AddBlockOutcome::Accepted { hash } => DataResponse {
                        action,
                        result: json!(true),
                        message: "Block Accepted".to_string(),
                        hash: Some(hash),
                    },
                    AddBlockOutcome::Rejected(reason) => {
                        tracing::info!("Block rejected: {:?}", reason);
                        DataResponse {
                            action,
                            result: json!(false),
                            message: "Block Rejected".to_string(),
                            hash: None,
                        }
                    }
                }
            }

            DataMessageType::Close => DataResponse {
                action,
                result: json!(true),
                message: "Closing connection".to_string(),
                hash: None,
            },
        };

        Ok(response)
    }
}

fn chunk_response(action: i64, chunk: Value) -> DataResponse {
    DataResponse {
        action,
        result: chunk,
        message: "Sending chunk".to_string(),
        hash: None,
    }
}

fn missing_chunk_response(action: i64) -> DataResponse {
    DataResponse {
        action,
        result: json!(false),
        message: "Error chunk may not exist".to_string(),
        hash: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{ChainBackend, RemoteChainBackend},
        store::ChainStoreConfig,
    };
    use tempfile::tempdir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    async fn spawn_service(dir: &std::path::Path) -> String {
        let store = Arc::new(Mutex::new(
            ChainStore::open(ChainStoreConfig::new(dir)).unwrap(),
        ));
        let service = Arc::new(DataService::new(store, Duration::from_secs(5)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(service.serve(listener));
        addr
    }

    #[tokio::test]
    async fn test_remote_backend_round_trip() {
        let dir = tempdir().unwrap();
        let addr = spawn_service(dir.path()).await;
        let backend = RemoteChainBackend::new(addr, Duration::from_secs(5));

        assert!(backend.chain().await.unwrap().is_empty());
        let empty_chunk = backend.last_chunk().await.unwrap().unwrap();
        assert!(empty_chunk.is_empty());

        let first = backend.add_block(Block::stage(None, vec![])).await.unwrap();
        let hash = first.hash().unwrap().to_string();
        assert_eq!(hash.len(), 64);

        // Stale link is refused
        let stale = backend.add_block(Block::stage(None, vec![])).await.unwrap();
        assert!(!stale.is_accepted());

        let second = backend
            .add_block(Block::stage(Some((hash.as_str(), 1)), vec![]))
            .await
            .unwrap();
        assert!(second.is_accepted());

        let tip = backend.tip().await.unwrap().unwrap();
        assert_eq!(tip.block_number(), 2);
        assert_eq!(tip.last_block_hash(), hash);

        let chunk = backend
            .chunk(&empty_chunk.chunk_filename)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk.blocks.len(), 2);
        assert!(backend.chunk("nope.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_long_lived_connection_and_close_sentinel() {
        let dir = tempdir().unwrap();
        let addr = spawn_service(dir.path()).await;

        let stream = TcpStream::connect(&addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        for _ in 0..2 {
            wire::write_message(&mut write_half, &Envelope::bare(2))
                .await
                .unwrap();
            let response: DataResponse = wire::read_message(&mut reader).await.unwrap().unwrap();
            assert_eq!(response.action, 2);
            assert_eq!(response.result, json!([]));
        }

        wire::write_message(&mut write_half, &Envelope::close())
            .await
            .unwrap();
        let mut line = String::new();
        assert_eq!(reader.read_line(&mut line).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_request_closes_connection() {
        let dir = tempdir().unwrap();
        let addr = spawn_service(dir.path()).await;

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        stream
            .write_all(b"{\"message_type\": 3, \"message_data\": {\"payload\": 1}}\n")
            .await
            .unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        assert_eq!(reader.read_line(&mut line).await.unwrap(), 0);
    }

    #[test]
    fn test_unknown_message_type() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Mutex::new(
            ChainStore::open(ChainStoreConfig::new(dir.path())).unwrap(),
        ));
        let service = DataService::new(store, Duration::from_secs(1));
        let err = service.handle(Envelope::bare(42)).unwrap_err();
        assert!(matches!(err, RequestError::UnknownMessageType(42)));
    }
}

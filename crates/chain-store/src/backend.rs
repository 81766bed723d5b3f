//! Access to the chain store from other services
//!
//! The block stager and the network validator never touch chunk files; they
//! go through a `ChainBackend`. In a single process this is the shared
//! `ChainStore` behind a mutex, across processes it is the data service.

use crate::{
    chunk::Chunk,
    error::BackendError,
    protocol::DataMessageType,
    store::{AddBlockOutcome, ChainStore, RejectReason},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use stakechain_ledger::{
    wire::{self, DataResponse, Envelope},
    Block,
};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Hash-link and persist a block
    async fn add_block(&self, block: Block) -> Result<AddBlockOutcome, BackendError>;

    /// Every persisted block in chain order
    async fn chain(&self) -> Result<Vec<Block>, BackendError>;

    /// The active chunk
    async fn last_chunk(&self) -> Result<Option<Chunk>, BackendError>;

    async fn chunk(&self, name: &str) -> Result<Option<Chunk>, BackendError>;

    /// Most recently accepted block
    async fn tip(&self) -> Result<Option<Block>, BackendError> {
        Ok(self
            .last_chunk()
            .await?
            .and_then(|chunk| chunk.blocks.last().cloned()))
    }
}

/// In-process backend sharing the store with the data service
#[derive(Clone)]
pub struct LocalChainBackend {
    store: Arc<Mutex<ChainStore>>,
}

impl LocalChainBackend {
    pub fn new(store: Arc<Mutex<ChainStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChainBackend for LocalChainBackend {
    /// Runs on the blocking pool: the append rewrites the active chunk file
    /// while the store lock is held.
    async fn add_block(&self, block: Block) -> Result<AddBlockOutcome, BackendError> {
        let store = self.store.clone();
        let outcome = tokio::task::spawn_blocking(move || store.lock().add_block(block)).await??;
        Ok(outcome)
    }

    async fn chain(&self) -> Result<Vec<Block>, BackendError> {
        Ok(self.store.lock().serialized_chain())
    }

    async fn last_chunk(&self) -> Result<Option<Chunk>, BackendError> {
        Ok(self.store.lock().last_chunk().cloned())
    }

    async fn chunk(&self, name: &str) -> Result<Option<Chunk>, BackendError> {
        Ok(self.store.lock().chunk(name).cloned())
    }

    async fn tip(&self) -> Result<Option<Block>, BackendError> {
        Ok(self.store.lock().tip().cloned())
    }
}

/// Backend talking to a data service, one fresh connection per request
#[derive(Debug, Clone)]
pub struct RemoteChainBackend {
    addr: String,
    timeout: Duration,
}

impl RemoteChainBackend {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, envelope: Envelope) -> Result<DataResponse, BackendError> {
        Ok(wire::request(&self.addr, &envelope, self.timeout).await?)
    }

    /// Parse a chunk answer; `result: false` means no such chunk
    fn chunk_result(response: DataResponse) -> Result<Option<Chunk>, BackendError> {
        match response.result {
            Value::Bool(false) | Value::Null => Ok(None),
            value => Ok(Some(serde_json::from_value(value)?)),
        }
    }
}

#[async_trait]
impl ChainBackend for RemoteChainBackend {
    async fn add_block(&self, block: Block) -> Result<AddBlockOutcome, BackendError> {
        let envelope = Envelope::new(DataMessageType::AddBlock.as_i64(), &block)?;
        let response = self.call(envelope).await?;

        match (response.result.as_bool(), response.hash) {
            (Some(true), Some(hash)) => Ok(AddBlockOutcome::Accepted { hash }),
            (Some(true), None) => Err(BackendError::UnexpectedResponse(
                "accepted block without hash".to_string(),
            )),
            (Some(false), _) => Ok(AddBlockOutcome::Rejected(RejectReason::Refused(
                response.message,
            ))),
            (None, _) => Err(BackendError::UnexpectedResponse(response.result.to_string())),
        }
    }

    async fn chain(&self) -> Result<Vec<Block>, BackendError> {
        let response = self
            .call(Envelope::bare(DataMessageType::SendChain.as_i64()))
            .await?;
        Ok(serde_json::from_value(response.result)?)
    }

    async fn last_chunk(&self) -> Result<Option<Chunk>, BackendError> {
        let response = self
            .call(Envelope::bare(DataMessageType::SendLastChunk.as_i64()))
            .await?;
        Self::chunk_result(response)
    }

    async fn chunk(&self, name: &str) -> Result<Option<Chunk>, BackendError> {
        let envelope = Envelope::new(
            DataMessageType::SendChunk.as_i64(),
            json!({ "chunkFilename": name }),
        )?;
        let response = self.call(envelope).await?;
        Self::chunk_result(response)
    }
}

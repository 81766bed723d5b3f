//! Chunked chain store
//!
//! Blocks are hash-linked on append and kept in memory as a list of chunks.
//! Every accepted block rewrites the active chunk file in full; write
//! failures are logged and the block stays in memory until the next
//! successful flush.

use crate::{chunk::Chunk, error::ChainStoreError, DEFAULT_CHUNK_SIZE_LIMIT};
use stakechain_ledger::Block;
use std::path::{Path, PathBuf};

/// Chain store configuration
#[derive(Debug, Clone)]
pub struct ChainStoreConfig {
    /// Directory holding the chunk files
    pub dir: PathBuf,
    /// Serialized size after which a new chunk is opened
    pub chunk_size_limit: usize,
}

impl ChainStoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            chunk_size_limit: DEFAULT_CHUNK_SIZE_LIMIT,
        }
    }

    pub fn with_chunk_size_limit(mut self, limit: usize) -> Self {
        self.chunk_size_limit = limit;
        self
    }
}

/// Why a block was not appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// `last_block_hash` does not match the tip's hash
    BrokenLink { expected: String, found: String },
    /// `block_number` is not the tip's number + 1. `expected` is `None` when
    /// the tip already holds the largest block number.
    BlockNumber { expected: Option<u64>, found: u64 },
    /// Rejected by a remote data layer
    Refused(String),
}

/// Result of `ChainStore::add_block`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddBlockOutcome {
    Accepted { hash: String },
    Rejected(RejectReason),
}

impl AddBlockOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AddBlockOutcome::Accepted { .. })
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            AddBlockOutcome::Accepted { hash } => Some(hash),
            AddBlockOutcome::Rejected(_) => None,
        }
    }
}

/// The persisted chain
pub struct ChainStore {
    dir: PathBuf,
    chunk_size_limit: usize,
    /// Chunks in creation order; the last one is the write target
    chunks: Vec<Chunk>,
    /// Serialized size of the active chunk as last written
    active_len: usize,
    block_count: usize,
}

impl ChainStore {
    /// Open the store, loading every chunk file found in the directory
    pub fn open(config: ChainStoreConfig) -> Result<Self, ChainStoreError> {
        std::fs::create_dir_all(&config.dir).map_err(|source| ChainStoreError::Io {
            path: config.dir.clone(),
            source,
        })?;

        let mut store = Self {
            dir: config.dir,
            chunk_size_limit: config.chunk_size_limit,
            chunks: Vec::new(),
            active_len: 0,
            block_count: 0,
        };
        store.deserialize_chain()?;
        Ok(store)
    }

    /// Rebuild the in-memory chain from the chunk files on disk
    fn deserialize_chain(&mut self) -> Result<(), ChainStoreError> {
        tracing::info!("Starting chain deserialization from {:?}", self.dir);

        let mut chunks = Vec::new();
        for path in chunk_files(&self.dir)? {
            chunks.push(Chunk::load(&path)?);
        }
        chunks.sort_by(|a, b| {
            a.index()
                .cmp(&b.index())
                .then_with(|| a.chunk_filename.cmp(&b.chunk_filename))
        });

        if chunks.is_empty() {
            chunks.push(Chunk::generate(0));
        }

        self.block_count = chunks.iter().map(|c| c.blocks.len()).sum();
        self.active_len = match chunks.last() {
            Some(chunk) => chunk.to_bytes().map(|b| b.len()).unwrap_or(0),
            None => 0,
        };
        self.chunks = chunks;

        tracing::info!(
            "Finished deserialization: {} blocks in {} chunks",
            self.block_count,
            self.chunks.len()
        );
        Ok(())
    }

    /// Hash-link and persist a block.
    ///
    /// The hash is computed over the block with `block_hash` blank. The first
    /// block is accepted unconditionally; later blocks must reference the
    /// tip's hash and carry the tip's number + 1.
    pub fn add_block(&mut self, mut block: Block) -> Result<AddBlockOutcome, ChainStoreError> {
        let hash = block.compute_hash()?;
        tracing::debug!("Hashed incoming block {}: {}", block.block_number(), hash);

        if let Some(tip) = self.tip() {
            if block.last_block_hash() != tip.block_hash() {
                tracing::warn!(
                    "Rejecting block {}: last hash {} does not match tip {}",
                    block.block_number(),
                    block.last_block_hash(),
                    tip.block_hash()
                );
                return Ok(AddBlockOutcome::Rejected(RejectReason::BrokenLink {
                    expected: tip.block_hash().to_string(),
                    found: block.last_block_hash().to_string(),
                }));
            }
            let expected = tip.block_number().checked_add(1);
            if expected != Some(block.block_number()) {
                tracing::warn!(
                    "Rejecting block {}: tip is block {}",
                    block.block_number(),
                    tip.block_number()
                );
                return Ok(AddBlockOutcome::Rejected(RejectReason::BlockNumber {
                    expected,
                    found: block.block_number(),
                }));
            }
        }

        block.seal(hash.clone());

        if self.active_len > self.chunk_size_limit {
            let index = self.chunks.len();
            let chunk = Chunk::generate(index);
            tracing::info!(
                "Active chunk reached {} bytes, rolling over to {}",
                self.active_len,
                chunk.chunk_filename
            );
            self.chunks.push(chunk);
            self.active_len = 0;
        }

        if let Some(active) = self.chunks.last_mut() {
            active.blocks.push(block);
        }
        self.block_count += 1;
        self.flush_active();

        tracing::info!("Accepted block {} ({} blocks)", hash, self.block_count);
        Ok(AddBlockOutcome::Accepted { hash })
    }

    /// Rewrite the active chunk file
    fn flush_active(&mut self) {
        let Some(chunk) = self.chunks.last() else {
            return;
        };

        let bytes = match chunk.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to serialize chunk {}: {}", chunk.chunk_filename, e);
                return;
            }
        };
        self.active_len = bytes.len();

        let path = self.dir.join(&chunk.chunk_filename);
        if let Err(e) = std::fs::write(&path, &bytes) {
            tracing::error!("Failed to write chunk {:?}: {}", path, e);
        }
    }

    /// Chunk by filename
    pub fn chunk(&self, name: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.chunk_filename == name)
    }

    /// Active chunk
    pub fn last_chunk(&self) -> Option<&Chunk> {
        self.chunks.last()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// All blocks in chain order
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.chunks.iter().flat_map(|c| c.blocks.iter())
    }

    /// Owned copy of the chain, as served to peers
    pub fn serialized_chain(&self) -> Vec<Block> {
        self.blocks().cloned().collect()
    }

    /// Most recently accepted block
    pub fn tip(&self) -> Option<&Block> {
        self.chunks.iter().rev().find_map(|c| c.blocks.last())
    }

    pub fn len(&self) -> usize {
        self.block_count
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// JSON files in the chunk directory
fn chunk_files(dir: &Path) -> Result<Vec<PathBuf>, ChainStoreError> {
    let io_err = |source| ChainStoreError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(files)
}

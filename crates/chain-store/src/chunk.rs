//! Chunk files: append-only groups of blocks

use crate::error::ChainStoreError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use stakechain_ledger::Block;
use std::path::Path;

const CHUNK_PREFIX: &str = "generated-chunk-";

/// A persisted group of blocks, one JSON file per chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub blocks: Vec<Block>,
    pub chunk_filename: String,
}

impl Chunk {
    /// Empty chunk with a generated `generated-chunk-<index>-<timestamp>.json` name
    pub fn generate(index: usize) -> Self {
        Self {
            blocks: Vec::new(),
            chunk_filename: format!(
                "{}{}-{}.json",
                CHUNK_PREFIX,
                index,
                Utc::now().format("%Y%m%dT%H%M%S%.6fZ")
            ),
        }
    }

    /// Creation index encoded in the filename
    pub fn index(&self) -> Option<usize> {
        parse_chunk_index(&self.chunk_filename)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Read and parse a chunk file
    pub fn load(path: &Path) -> Result<Self, ChainStoreError> {
        let bytes = std::fs::read(path).map_err(|source| ChainStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ChainStoreError::CorruptChunk {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Index of a generated chunk filename, `None` for foreign names
pub fn parse_chunk_index(filename: &str) -> Option<usize> {
    filename
        .strip_prefix(CHUNK_PREFIX)?
        .split('-')
        .next()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_carry_index() {
        let chunk = Chunk::generate(12);
        assert!(chunk.chunk_filename.starts_with("generated-chunk-12-"));
        assert!(chunk.chunk_filename.ends_with(".json"));
        assert_eq!(chunk.index(), Some(12));
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_foreign_names_have_no_index() {
        assert_eq!(parse_chunk_index("notes.json"), None);
        assert_eq!(parse_chunk_index("generated-chunk-x-1.json"), None);
    }

    #[test]
    fn test_file_layout() {
        let chunk = Chunk::generate(0);
        let value = serde_json::to_value(&chunk).unwrap();
        assert!(value["blocks"].as_array().unwrap().is_empty());
        assert_eq!(value["chunkFilename"], chunk.chunk_filename.as_str());
    }
}

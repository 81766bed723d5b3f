//! Data-layer message catalogue

use crate::error::RequestError;
use stakechain_ledger::wire::CLOSE_CONNECTION;

/// `message_type` values accepted by the data service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMessageType {
    /// Chunk by `chunkFilename`
    SendChunk = 1,
    /// Every persisted block
    SendChain = 2,
    AddBlock = 3,
    SendLastChunk = 4,
    Close = -1,
}

impl DataMessageType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for DataMessageType {
    type Error = RequestError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::SendChunk),
            2 => Ok(Self::SendChain),
            3 => Ok(Self::AddBlock),
            4 => Ok(Self::SendLastChunk),
            CLOSE_CONNECTION => Ok(Self::Close),
            other => Err(RequestError::UnknownMessageType(other)),
        }
    }
}

//! Request types and response codes of the network service

use crate::error::NetworkError;

/// `request_type` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// A block proposed by a remote validator
    IncomingBlock = 1,
    /// The full chain, relayed from the chain store
    Blockchain = 2,
}

impl RequestType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for RequestType {
    type Error = NetworkError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::IncomingBlock),
            2 => Ok(Self::Blockchain),
            other => Err(NetworkError::UnknownRequestType(other)),
        }
    }
}

/// `opt_code` values. Key, sequence, hash, validator and header rejections
/// are reserved; nothing checks signatures yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptCode {
    WaitingValidation = 0,
    AcceptedAndForward = 1,
    SendingSerializedBlockchain = 2,
    RejectedInvalidPublicKey = -1,
    RejectedInvalidSequence = -2,
    RejectedInvalidBlockHash = -3,
    RejectedInvalidChainConnection = -4,
    RejectedInvalidBlockNumber = -5,
    RejectedInvalidValidator = -6,
    RejectedDataLayerNotAccepted = -7,
    RejectedInvalidFbeHeader = -8,
}

impl OptCode {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn is_rejection(self) -> bool {
        self.as_i64() < 0
    }

    /// Wire name, sent as `msg`
    pub fn name(self) -> &'static str {
        match self {
            OptCode::WaitingValidation => "WAITING_VALIDATION",
            OptCode::AcceptedAndForward => "ACCEPTED_AND_FORWARD",
            OptCode::SendingSerializedBlockchain => "SENDING_SERIALIZED_BLOCKCHAIN",
            OptCode::RejectedInvalidPublicKey => "REJECTED_INVALID_PUBLIC_KEY",
            OptCode::RejectedInvalidSequence => "REJECTED_INVALID_SEQUENCE",
            OptCode::RejectedInvalidBlockHash => "REJECTED_INVALID_BLOCK_HASH",
            OptCode::RejectedInvalidChainConnection => "REJECTED_INVALID_CHAIN_CONNECTION",
            OptCode::RejectedInvalidBlockNumber => "REJECTED_INVALID_BLOCK_NUMBER",
            OptCode::RejectedInvalidValidator => "REJECTED_INVALID_VALIDATOR",
            OptCode::RejectedDataLayerNotAccepted => "REJECTED_DATA_LAYER_NOT_ACCEPTED",
            OptCode::RejectedInvalidFbeHeader => "REJECTED_INVALID_FBE_HEADER",
        }
    }
}

impl TryFrom<i64> for OptCode {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => OptCode::WaitingValidation,
            1 => OptCode::AcceptedAndForward,
            2 => OptCode::SendingSerializedBlockchain,
            -1 => OptCode::RejectedInvalidPublicKey,
            -2 => OptCode::RejectedInvalidSequence,
            -3 => OptCode::RejectedInvalidBlockHash,
            -4 => OptCode::RejectedInvalidChainConnection,
            -5 => OptCode::RejectedInvalidBlockNumber,
            -6 => OptCode::RejectedInvalidValidator,
            -7 => OptCode::RejectedDataLayerNotAccepted,
            -8 => OptCode::RejectedInvalidFbeHeader,
            other => return Err(other),
        })
    }
}

//! Transactions submitted by peers
//!
//! A transaction is created from an untyped submission payload, priced once
//! by the block stager and then confirmed, which stamps the timestamp and
//! computes the SHA-256 hash over its serialized form.

use crate::{error::LedgerError, sha256_hex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction discriminant as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionCode {
    HoldStake = 1,
    Upload = 2,
    Download = 3,
}

impl TransactionCode {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for TransactionCode {
    type Error = LedgerError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::HoldStake),
            2 => Ok(Self::Upload),
            3 => Ok(Self::Download),
            other => Err(LedgerError::UnknownTransactionCode(other)),
        }
    }
}

/// Variant-specific transaction data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    /// Bid to become a validator for the next block
    HoldStake { stake: u64, ip: String, port: u16 },
    Upload { filename: String },
    Download { filename: String, receiver: String },
}

impl TransactionKind {
    pub fn code(&self) -> TransactionCode {
        match self {
            Self::HoldStake { .. } => TransactionCode::HoldStake,
            Self::Upload { .. } => TransactionCode::Upload,
            Self::Download { .. } => TransactionCode::Download,
        }
    }
}

/// A ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireTransaction", into = "WireTransaction")]
pub struct Transaction {
    pub peer_id: String,
    pub cost: i64,
    pub reward: i64,
    pub fee: i64,
    /// Hex SHA-256, empty until confirmed
    pub hash: String,
    /// Set at confirmation
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: TransactionKind,
}

impl Transaction {
    /// Create an unpriced, unconfirmed transaction
    pub fn new(peer_id: impl Into<String>, kind: TransactionKind) -> Self {
        Self {
            peer_id: peer_id.into(),
            cost: 0,
            reward: 0,
            fee: 0,
            hash: String::new(),
            timestamp: None,
            kind,
        }
    }

    /// Build a transaction from a client submission.
    ///
    /// Each variant validates its own required fields; unknown codes and
    /// missing fields are rejected rather than defaulted.
    pub fn from_submission(code: i64, submission: &Submission) -> Result<Self, LedgerError> {
        let code = TransactionCode::try_from(code)?;
        let require = |value: &Option<String>, field: &'static str| {
            value
                .clone()
                .ok_or(LedgerError::MissingField { code, field })
        };

        let peer_id = require(&submission.peer_id, "peer_id")?;
        let kind = match code {
            TransactionCode::HoldStake => TransactionKind::HoldStake {
                stake: submission
                    .stake
                    .ok_or(LedgerError::MissingField { code, field: "stake" })?,
                ip: require(&submission.ip, "ip")?,
                port: submission
                    .port
                    .ok_or(LedgerError::MissingField { code, field: "port" })?,
            },
            TransactionCode::Upload => TransactionKind::Upload {
                filename: require(&submission.filename, "filename")?,
            },
            TransactionCode::Download => TransactionKind::Download {
                filename: require(&submission.filename, "filename")?,
                receiver: require(&submission.receiver, "receiver")?,
            },
        };

        Ok(Self::new(peer_id, kind))
    }

    /// The submission that would recreate this transaction, used when a
    /// transaction has to be re-routed to another validator.
    pub fn to_submission(&self) -> (TransactionCode, Submission) {
        let mut submission = Submission {
            peer_id: Some(self.peer_id.clone()),
            ..Default::default()
        };
        match &self.kind {
            TransactionKind::HoldStake { stake, ip, port } => {
                submission.stake = Some(*stake);
                submission.ip = Some(ip.clone());
                submission.port = Some(*port);
            }
            TransactionKind::Upload { filename } => {
                submission.filename = Some(filename.clone());
            }
            TransactionKind::Download { filename, receiver } => {
                submission.filename = Some(filename.clone());
                submission.receiver = Some(receiver.clone());
            }
        }
        (self.code(), submission)
    }

    pub fn code(&self) -> TransactionCode {
        self.kind.code()
    }

    /// Stake offered by a hold-stake transaction
    pub fn stake(&self) -> Option<u64> {
        match self.kind {
            TransactionKind::HoldStake { stake, .. } => Some(stake),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        !self.hash.is_empty() && self.timestamp.is_some()
    }

    /// Stamp the confirmation time and compute the transaction hash.
    ///
    /// The hash covers the serialized form with the hash field blank and the
    /// priced cost/fee/reward in place. Confirming twice yields a fresh
    /// timestamp and hash.
    pub fn confirm(&mut self) -> Result<&str, LedgerError> {
        self.timestamp = Some(Utc::now());
        self.hash.clear();
        let bytes = serde_json::to_vec(self)?;
        self.hash = sha256_hex(&bytes);
        Ok(&self.hash)
    }
}

/// Untyped submission payload as sent by clients (`message_data`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stake: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Set when a non-validator relays the submission; relayed submissions
    /// are never relayed again
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forwarded: bool,
}

/// Serialized transaction layout (wire and disk)
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
    peer_id: String,
    transaction_hash: String,
    transaction_cost: i64,
    transaction_fee: i64,
    transaction_reward: i64,
    transaction_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stake: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(rename = "file_name", default, skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    receiver: Option<String>,
}

impl From<Transaction> for WireTransaction {
    fn from(tx: Transaction) -> Self {
        let mut wire = WireTransaction {
            peer_id: tx.peer_id,
            transaction_hash: tx.hash,
            transaction_cost: tx.cost,
            transaction_fee: tx.fee,
            transaction_reward: tx.reward,
            transaction_code: tx.kind.code().as_i64(),
            timestamp: tx.timestamp,
            stake: None,
            ip: None,
            port: None,
            filename: None,
            file_name: None,
            receiver: None,
        };
        match tx.kind {
            TransactionKind::HoldStake { stake, ip, port } => {
                wire.stake = Some(stake);
                wire.ip = Some(ip);
                wire.port = Some(port);
            }
            TransactionKind::Upload { filename } => wire.filename = Some(filename),
            TransactionKind::Download { filename, receiver } => {
                wire.file_name = Some(filename);
                wire.receiver = Some(receiver);
            }
        }
        wire
    }
}

impl TryFrom<WireTransaction> for Transaction {
    type Error = LedgerError;

    fn try_from(wire: WireTransaction) -> Result<Self, Self::Error> {
        let code = TransactionCode::try_from(wire.transaction_code)?;
        let missing = |field| LedgerError::MissingField { code, field };

        let kind = match code {
            TransactionCode::HoldStake => TransactionKind::HoldStake {
                stake: wire.stake.ok_or_else(|| missing("stake"))?,
                ip: wire.ip.ok_or_else(|| missing("ip"))?,
                port: wire.port.ok_or_else(|| missing("port"))?,
            },
            TransactionCode::Upload => TransactionKind::Upload {
                filename: wire.filename.ok_or_else(|| missing("filename"))?,
            },
            TransactionCode::Download => TransactionKind::Download {
                filename: wire.file_name.ok_or_else(|| missing("file_name"))?,
                receiver: wire.receiver.ok_or_else(|| missing("receiver"))?,
            },
        };

        Ok(Self {
            peer_id: wire.peer_id,
            cost: wire.transaction_cost,
            reward: wire.transaction_reward,
            fee: wire.transaction_fee,
            hash: wire.transaction_hash,
            timestamp: wire.timestamp,
            kind,
        })
    }
}

//! Newline-delimited JSON envelopes spoken between services
//!
//! Every message is one JSON value terminated by `\n`. Long-lived
//! connections are closed by sending `message_type = -1`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// `message_type` that closes a long-lived connection
pub const CLOSE_CONNECTION: i64 = -1;

/// Longest inbound line a service accepts: one full chunk plus envelope
pub const MAX_MESSAGE_LEN: u64 = 6 * 1024 * 1024;

/// Acknowledgement returned by the consensus endpoint
pub const TRANSACTION_SUBMITTED: &str = "Transaction Submitted";

#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Timed out talking to {0}")]
    Timeout(String),

    #[error("Connection closed by {0} before a response")]
    ConnectionClosed(String),

    #[error("Message exceeds {0} bytes")]
    TooLarge(u64),
}

/// Request envelope for the consensus and data services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_type: i64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub message_data: Value,
}

impl Envelope {
    pub fn new(message_type: i64, data: impl Serialize) -> Result<Self, WireError> {
        Ok(Self {
            message_type,
            message_data: serde_json::to_value(data)?,
        })
    }

    /// Envelope without a payload
    pub fn bare(message_type: i64) -> Self {
        Self {
            message_type,
            message_data: Value::Null,
        }
    }

    pub fn close() -> Self {
        Self::bare(CLOSE_CONNECTION)
    }

    pub fn is_close(&self) -> bool {
        self.message_type == CLOSE_CONNECTION
    }
}

/// Response envelope of the data service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    pub action: i64,
    pub result: Value,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Response of the consensus submission endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub response: String,
}

impl SubmissionAck {
    pub fn submitted() -> Self {
        Self {
            response: TRANSACTION_SUBMITTED.to_string(),
        }
    }
}

/// Request envelope of the network (block proposal) service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub request_type: i64,
    #[serde(default)]
    pub request_data: Value,
}

impl ProposalRequest {
    pub fn is_close(&self) -> bool {
        self.request_type == CLOSE_CONNECTION
    }
}

/// Response envelope of the network service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub opt_code: i64,
    pub msg: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Write one message followed by a newline
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next message, skipping blank lines. `None` on end of stream.
///
/// Lines longer than `MAX_MESSAGE_LEN` fail with `TooLarge`.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, WireError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    read_message_limited(reader, MAX_MESSAGE_LEN).await
}

/// `read_message` with an explicit line limit
pub async fn read_message_limited<R, T>(reader: &mut R, limit: u64) -> Result<Option<T>, WireError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = (&mut *reader).take(limit).read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        if read as u64 >= limit && !line.ends_with('\n') {
            return Err(WireError::TooLarge(limit));
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(Some(serde_json::from_str(trimmed)?));
        }
    }
}

/// Open a connection, send one request and wait for one response.
///
/// Responses may carry the whole chain, so only the timeout bounds them.
pub async fn request<Req, Resp>(
    addr: &str,
    message: &Req,
    timeout: Duration,
) -> Result<Resp, WireError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let exchange = async {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_message(&mut write_half, message).await?;

        let mut reader = BufReader::new(read_half);
        let response: Option<Resp> = read_message_limited(&mut reader, u64::MAX).await?;
        response.ok_or_else(|| WireError::ConnectionClosed(addr.to_string()))
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| WireError::Timeout(addr.to_string()))?
}

/// Open a connection, send one message and close without waiting
pub async fn send<T: Serialize>(addr: &str, message: &T, timeout: Duration) -> Result<(), WireError> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        write_message(&mut stream, message).await?;
        stream.shutdown().await?;
        Ok::<(), WireError>(())
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| WireError::Timeout(addr.to_string()))?
}

//! RPC message types and framing for peer communication.
//!
//! Every message is bincode-encoded and sent with a 4-byte big-endian length
//! prefix. A connection carries one request/response exchange at a time.

use crate::error::{Error, LoadError, NetworkError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted on the wire.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Network message wrapper for all communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Look a key up on the owner only: its store, then its loader.
    Fetch(FetchRequest),

    /// Full lookup path, for clients outside the peer set.
    Get(FetchRequest),

    /// Response to `Fetch` or `Get`.
    Response(FetchResponse),

    /// Liveness check.
    Ping(PingRequest),

    /// Response to ping.
    Pong(PongResponse),
}

/// A key lookup within a named group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Group name.
    pub group: String,

    /// Key bytes.
    pub key: Bytes,
}

impl FetchRequest {
    pub fn new(group: impl Into<String>, key: impl Into<Bytes>) -> Self {
        Self {
            group: group.into(),
            key: key.into(),
        }
    }
}

/// Outcome of a lookup as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// `payload` holds the value (possibly empty).
    Ok,
    /// The backing store has no such key.
    NotFound,
    /// The owner's backing store is unreachable.
    Unavailable,
    /// Any other failure, described by `error`.
    Error,
}

/// Response to a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: Status,
    pub payload: Bytes,
    pub error: Option<String>,
}

impl FetchResponse {
    /// A successful lookup.
    pub fn ok(value: Bytes) -> Self {
        Self {
            status: Status::Ok,
            payload: value,
            error: None,
        }
    }

    /// Describe a failed lookup.
    pub fn from_error(err: &Error) -> Self {
        let (status, error) = match err {
            Error::Load(LoadError::NotFound) => (Status::NotFound, None),
            Error::Load(LoadError::Unavailable(reason)) => {
                (Status::Unavailable, Some(reason.clone()))
            }
            other => (Status::Error, Some(other.to_string())),
        };

        Self {
            status,
            payload: Bytes::new(),
            error,
        }
    }

    /// Convert back into the result the owner produced.
    pub fn into_result(self) -> Result<Bytes> {
        match self.status {
            Status::Ok => Ok(self.payload),
            Status::NotFound => Err(LoadError::NotFound.into()),
            Status::Unavailable => Err(LoadError::Unavailable(
                self.error.unwrap_or_else(|| "remote backing store unavailable".into()),
            )
            .into()),
            Status::Error => Err(Error::Remote(
                self.error.unwrap_or_else(|| "unspecified remote error".into()),
            )),
        }
    }
}

impl From<Result<Bytes>> for FetchResponse {
    fn from(result: Result<Bytes>) -> Self {
        match result {
            Ok(value) => FetchResponse::ok(value),
            Err(e) => FetchResponse::from_error(&e),
        }
    }
}

/// Ping request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    /// Sender's address, if it is a peer.
    pub from: Option<String>,
}

/// Response to ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongResponse {
    /// Responder's advertised address.
    pub addr: String,

    /// Groups the responder serves.
    pub groups: Vec<String>,
}

/// Encode a message to bytes.
pub fn encode_message(msg: &Message) -> std::result::Result<Vec<u8>, bincode::Error> {
    bincode::serialize(msg)
}

/// Decode a message from bytes.
pub fn decode_message(data: &[u8]) -> std::result::Result<Message, bincode::Error> {
    bincode::deserialize(data)
}

/// Frame a message with length prefix for TCP transmission.
pub fn frame_message(msg: &Message) -> Result<Vec<u8>> {
    let data = encode_message(msg)?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(NetworkError::SendFailed(format!(
            "message of {} bytes exceeds frame limit",
            data.len()
        ))
        .into());
    }
    let len = data.len() as u32;

    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&data);

    Ok(framed)
}

/// Write one framed message.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = frame_message(msg)?;
    writer
        .write_all(&framed)
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    Ok(())
}

/// Read one framed message; `None` when the peer closed the connection
/// cleanly between messages.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string()).into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetworkError::ReceiveFailed(format!("frame of {len} bytes too large")).into());
    }

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .await
        .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

    decode_message(&data)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("undecodable message: {e}")))
}

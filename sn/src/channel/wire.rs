//! Wire protocol between channel clients and the channel server
//!
//! Simple JSON-over-newline protocol. Each frame is a single line of JSON followed by `\n`.
//! The same framing is used on the peer stream between the relay bridge and the cloud.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::ChannelError;
use super::messages::{Envelope, RouteKey};

/// Maximum frame size in bytes, including the newline
pub const MAX_FRAME_SIZE: usize = 4096;

/// Requests from a channel client to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ChannelRequest {
    /// Enqueue a message
    Send { envelope: Envelope },

    /// Take the oldest message for `key`
    Receive { key: RouteKey, blocking: bool },
}

/// Responses from the server to a channel client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ChannelResponse {
    /// Send accepted
    Ok,

    /// A message matched the receive key
    Message { envelope: Envelope },

    /// Nothing queued for the key (non-blocking receive)
    Empty,

    /// The server could not execute the request
    Error { message: String },
}

/// Serialize `value` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(value)?;
    if json.len() + 1 > MAX_FRAME_SIZE {
        return Err(ChannelError::FrameTooLarge(json.len() + 1));
    }
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `Ok(None)` means the other side closed the stream
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, ChannelError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;

    if bytes_read == 0 {
        debug!("read_frame: end of stream");
        return Ok(None);
    }

    if bytes_read > MAX_FRAME_SIZE {
        return Err(ChannelError::FrameTooLarge(bytes_read));
    }

    let value = serde_json::from_str(line.trim())?;
    Ok(Some(value))
}

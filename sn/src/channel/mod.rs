//! Message channel shared by the controller, the relay bridge and the devices
//!
//! The channel is a multi-producer, multi-consumer queue of [`Envelope`]s. A receiver
//! names the route key it wants and gets the oldest message addressed to exactly that
//! key. The controller owns the one [`MemoryChannel`]; device processes reach it via
//! [`ChannelClient`], which talks to the [`ChannelServer`] over a Unix Domain Socket
//! using newline-delimited JSON.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub mod client;
pub mod listener;
pub mod memory;
pub mod messages;
pub mod wire;

pub use client::ChannelClient;
pub use listener::{ChannelServer, cleanup_socket};
pub use memory::MemoryChannel;
pub use messages::{
    DeviceKind, DeviceSnapshot, Envelope, Identity, Message, RelayEvent, RelayTrigger, RouteKey, TO_CONTROLLER,
};

/// Errors from channel operations
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Channel server error: {0}")]
    Remote(String),
}

/// Whether a receive waits for a matching message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    Blocking,
    NonBlocking,
}

/// Shared message channel
///
/// `send` never waits for a receiver. `receive` returns `Ok(None)` in
/// [`ReceiveMode::NonBlocking`] when nothing is queued for the key.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Enqueue a message; text fields beyond their bounds are truncated
    async fn send(&self, envelope: Envelope) -> Result<(), ChannelError>;

    /// Take the oldest message whose route key equals `key`
    async fn receive(&self, key: RouteKey, mode: ReceiveMode) -> Result<Option<Envelope>, ChannelError>;
}

/// Get the well-known socket path for the channel server
///
/// Uses the runtime directory when available, like the peer socket.
pub fn get_socket_path() -> PathBuf {
    runtime_base().join("channel.sock")
}

/// Base directory for the well-known sockets
pub(crate) fn runtime_base() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sensornet")
}

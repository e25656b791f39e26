//! Relay between the controller and the external peer
//!
//! The [`RelayBridge`] forwards relay events and query errors from the channel to the
//! peer, and turns peer queries into channel messages for the dispatch engine. The
//! peer (the cloud) serves a Unix Domain Socket; the bridge connects to it and splits
//! the connection into an inbound and an outbound half.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

pub mod bridge;
pub mod records;

pub use bridge::{RelayBridge, RelayStats};
pub use records::{PeerRecord, PeerRequest};

/// Default timeout for connecting to the peer
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Get the well-known socket path served by the peer
pub fn get_peer_socket_path() -> PathBuf {
    crate::channel::runtime_base().join("cloud.sock")
}

/// Connect to the peer and split the stream into (inbound, outbound)
pub async fn connect_peer(socket_path: &Path) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    debug!(?socket_path, "connect_peer: called");
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket_path))
        .await
        .context("Peer connection timeout")?
        .context("Failed to connect to peer socket")?;
    debug!(?socket_path, "connect_peer: connected");
    Ok(stream.into_split())
}

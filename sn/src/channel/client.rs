//! Channel client for device processes
//!
//! Provides the [`MessageChannel`] interface over a connection to the controller's
//! channel server. One request is in flight per client at a time, so a blocking receive
//! holds the connection until a message arrives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

use super::messages::{Envelope, RouteKey};
use super::wire::{ChannelRequest, ChannelResponse, read_frame, write_frame};
use super::{ChannelError, MessageChannel, ReceiveMode};

/// Default timeout for connecting to the channel server
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Remote handle on the controller's message channel
pub struct ChannelClient {
    socket_path: PathBuf,
    connection: Mutex<Connection>,
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

impl ChannelClient {
    /// Connect to the channel server at a specific path
    pub async fn connect_at(socket_path: &Path) -> Result<Self> {
        debug!(?socket_path, "ChannelClient::connect_at: called");
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to channel socket")?;

        let (read_half, writer) = stream.into_split();
        debug!(?socket_path, "ChannelClient::connect_at: connected");
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            connection: Mutex::new(Connection {
                reader: BufReader::new(read_half),
                writer,
            }),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn request(&self, request: ChannelRequest) -> Result<ChannelResponse, ChannelError> {
        let mut connection = self.connection.lock().await;
        write_frame(&mut connection.writer, &request).await?;
        let response = read_frame(&mut connection.reader).await?.ok_or(ChannelError::Closed)?;
        debug!(?response, "ChannelClient::request: received response");
        Ok(response)
    }
}

#[async_trait]
impl MessageChannel for ChannelClient {
    async fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        let envelope = envelope.bounded();
        match self.request(ChannelRequest::Send { envelope }).await? {
            ChannelResponse::Ok => Ok(()),
            ChannelResponse::Error { message } => Err(ChannelError::Remote(message)),
            other => Err(ChannelError::Remote(format!("Unexpected response: {:?}", other))),
        }
    }

    async fn receive(&self, key: RouteKey, mode: ReceiveMode) -> Result<Option<Envelope>, ChannelError> {
        let request = ChannelRequest::Receive {
            key,
            blocking: mode == ReceiveMode::Blocking,
        };
        match self.request(request).await? {
            ChannelResponse::Message { envelope } => Ok(Some(envelope)),
            ChannelResponse::Empty => Ok(None),
            ChannelResponse::Error { message } => Err(ChannelError::Remote(message)),
            ChannelResponse::Ok => Err(ChannelError::Remote("Unexpected response: Ok".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::listener::ChannelServer;
    use crate::channel::memory::MemoryChannel;
    use crate::channel::messages::{DeviceKind, Identity, Message};
    use crate::shutdown::ShutdownFlag;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn start_server(temp: &TempDir) -> (Arc<MemoryChannel>, ShutdownFlag, PathBuf) {
        let socket_path = temp.path().join("channel.sock");
        let server = ChannelServer::bind_at(&socket_path).unwrap();
        let channel = Arc::new(MemoryChannel::new());
        let shutdown = ShutdownFlag::new();
        tokio::spawn(server.run(channel.clone(), shutdown.clone()));
        (channel, shutdown, socket_path)
    }

    #[tokio::test]
    async fn test_connect_fails_without_server() {
        let temp = TempDir::new().unwrap();
        let result = ChannelClient::connect_at(&temp.path().join("nonexistent.sock")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_reaches_memory_channel() {
        let temp = TempDir::new().unwrap();
        let (channel, shutdown, socket_path) = start_server(&temp).await;

        let client = ChannelClient::connect_at(&socket_path).await.unwrap();
        client
            .send(Envelope::to_controller(
                Identity(21),
                Message::Hello {
                    name: "thermo".to_string(),
                    kind: DeviceKind::Sensor,
                    threshold: 50,
                },
            ))
            .await
            .unwrap();

        let received = channel
            .receive(RouteKey::Controller, ReceiveMode::NonBlocking)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.sender, Identity(21));
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_non_blocking_receive_empty() {
        let temp = TempDir::new().unwrap();
        let (_channel, shutdown, socket_path) = start_server(&temp).await;

        let client = ChannelClient::connect_at(&socket_path).await.unwrap();
        let result = client
            .receive(RouteKey::Identity(Identity(21)), ReceiveMode::NonBlocking)
            .await
            .unwrap();
        assert!(result.is_none());
        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_blocking_receive_gets_reply() {
        let temp = TempDir::new().unwrap();
        let (channel, shutdown, socket_path) = start_server(&temp).await;

        let client = ChannelClient::connect_at(&socket_path).await.unwrap();
        let waiter =
            tokio::spawn(async move { client.receive(RouteKey::Identity(Identity(21)), ReceiveMode::Blocking).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel
            .send(Envelope::new(Identity(21), Identity(1), Message::Ack { sequence: None }))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("blocking receive should complete")
            .unwrap()
            .unwrap();
        assert_eq!(received.map(|e| e.message), Some(Message::Ack { sequence: None }));
        shutdown.trigger();
    }
}

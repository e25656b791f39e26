//! Channel server for the controller side
//!
//! Exposes the controller's [`MemoryChannel`] to device processes over a Unix Domain
//! Socket. Each connection is served by its own task; requests on one connection are
//! answered in order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::wire::{ChannelRequest, ChannelResponse, read_frame, write_frame};
use super::{ChannelError, MessageChannel, ReceiveMode};
use crate::shutdown::ShutdownFlag;

/// Listening side of the channel socket
#[derive(Debug)]
pub struct ChannelServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ChannelServer {
    /// Bind the channel socket at a specific path
    ///
    /// Handles cleanup of stale socket files from previous runs.
    pub fn bind_at(socket_path: &Path) -> Result<Self> {
        debug!(?socket_path, "ChannelServer::bind_at: creating channel socket");

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
        }

        if socket_path.exists() {
            debug!(?socket_path, "ChannelServer::bind_at: removing stale socket");
            std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("Failed to bind channel socket")?;
        debug!(?socket_path, "ChannelServer::bind_at: socket bound successfully");

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept device connections until shutdown, then remove the socket file
    pub async fn run(self, channel: Arc<dyn MessageChannel>, shutdown: ShutdownFlag) -> Result<()> {
        info!(socket_path = ?self.socket_path, "Channel server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            debug!("ChannelServer::run: connection accepted");
                            let channel = channel.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, channel).await {
                                    warn!(error = %e, "Channel connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "ChannelServer::run: accept error");
                        }
                    }
                }
                _ = shutdown.triggered() => {
                    debug!("ChannelServer::run: shutdown observed");
                    break;
                }
            }
        }

        cleanup_socket(&self.socket_path);
        info!("Channel server stopped");
        Ok(())
    }
}

/// Execute requests from one client until it disconnects
pub async fn serve_connection(stream: UnixStream, channel: Arc<dyn MessageChannel>) -> Result<(), ChannelError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    while let Some(request) = read_frame::<_, ChannelRequest>(&mut reader).await? {
        debug!(?request, "serve_connection: request");
        let response = match request {
            ChannelRequest::Send { envelope } => match channel.send(envelope).await {
                Ok(()) => ChannelResponse::Ok,
                Err(e) => ChannelResponse::Error { message: e.to_string() },
            },
            ChannelRequest::Receive { key, blocking } => {
                let mode = if blocking {
                    ReceiveMode::Blocking
                } else {
                    ReceiveMode::NonBlocking
                };
                match channel.receive(key, mode).await {
                    Ok(Some(envelope)) => ChannelResponse::Message { envelope },
                    Ok(None) => ChannelResponse::Empty,
                    Err(e) => ChannelResponse::Error { message: e.to_string() },
                }
            }
        };
        write_frame(&mut write_half, &response).await?;
    }

    debug!("serve_connection: client disconnected");
    Ok(())
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

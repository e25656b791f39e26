//! Relay bridge loop

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::records::{PeerRecord, PeerRequest};
use crate::channel::wire::{MAX_FRAME_SIZE, write_frame};
use crate::channel::{ChannelError, Envelope, Identity, Message, MessageChannel, ReceiveMode, RouteKey};
use crate::shutdown::{RelayWake, ShutdownFlag};

/// Default pause when neither side has anything to do
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 1024;

/// Counters reported when the bridge stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub events_forwarded: usize,
    pub errors_forwarded: usize,
    pub queries_forwarded: usize,
    pub records_skipped: usize,
}

/// Bridge between the channel and the external peer
///
/// `R` is the read-only inbound stream from the peer, `W` the write-only outbound one.
pub struct RelayBridge<R, W> {
    identity: Identity,
    channel: Arc<dyn MessageChannel>,
    wake: RelayWake,
    inbound: R,
    outbound: W,
    inbound_open: bool,
    pending: Vec<u8>,
    poll_interval: Duration,
    stats: RelayStats,
}

impl<R, W> std::fmt::Debug for RelayBridge<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayBridge")
            .field("identity", &self.identity)
            .field("inbound_open", &self.inbound_open)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<R, W> RelayBridge<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a bridge that receives on `identity`'s route key
    pub fn new(identity: Identity, channel: Arc<dyn MessageChannel>, wake: RelayWake, inbound: R, outbound: W) -> Self {
        debug!(%identity, "RelayBridge::new: called");
        Self {
            identity,
            channel,
            wake,
            inbound,
            outbound,
            inbound_open: true,
            pending: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stats: RelayStats::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Relay until shutdown is requested, then send `Stop` and close the outbound stream
    pub async fn run(mut self, shutdown: &ShutdownFlag) -> Result<RelayStats, ChannelError> {
        info!(identity = %self.identity, "Relay bridge started");
        let mut chunk = [0u8; READ_CHUNK];

        while !shutdown.is_set() {
            if self.wake.take() {
                self.drain_one().await?;
                continue;
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = shutdown.triggered() => {}
                read = self.inbound.read(&mut chunk), if self.inbound_open => {
                    self.handle_read(read, &chunk).await?;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Relay bridge shutting down");
        self.finish().await
    }

    /// Move one pending message from the channel to the peer
    ///
    /// Returns false when nothing was pending.
    async fn drain_one(&mut self) -> Result<bool, ChannelError> {
        let key = RouteKey::Identity(self.identity);
        let Some(envelope) = self.channel.receive(key, ReceiveMode::NonBlocking).await? else {
            debug!("RelayBridge::drain_one: nothing pending");
            return Ok(false);
        };

        let record = match envelope.message {
            Message::Relay { event } => {
                self.stats.events_forwarded += 1;
                PeerRecord::Event { event }
            }
            Message::QueryError { message } => {
                self.stats.errors_forwarded += 1;
                PeerRecord::Error { message }
            }
            other => {
                warn!(kind = other.kind_name(), sender = %envelope.sender, "Relay bridge dropped unexpected message");
                return Ok(false);
            }
        };

        debug!(?record, "RelayBridge::drain_one: writing record");
        write_frame(&mut self.outbound, &record).await?;
        Ok(true)
    }

    async fn handle_read(&mut self, read: std::io::Result<usize>, chunk: &[u8]) -> Result<(), ChannelError> {
        match read {
            Ok(0) => {
                warn!("Peer closed its side; no more peer queries");
                self.inbound_open = false;
                self.pending.clear();
                Ok(())
            }
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                self.forward_complete_records().await
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn forward_complete_records(&mut self) -> Result<(), ChannelError> {
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            if line.len() > MAX_FRAME_SIZE {
                warn!(size = line.len(), "Oversized peer record skipped");
                self.stats.records_skipped += 1;
                continue;
            }
            self.forward_record(&line).await?;
        }

        if self.pending.len() > MAX_FRAME_SIZE {
            warn!(size = self.pending.len(), "Oversized peer record skipped");
            self.stats.records_skipped += 1;
            self.pending.clear();
        }
        Ok(())
    }

    async fn forward_record(&mut self, line: &[u8]) -> Result<(), ChannelError> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let request: PeerRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, record = %text, "Malformed peer record skipped");
                self.stats.records_skipped += 1;
                return Ok(());
            }
        };

        debug!(?request, "RelayBridge::forward_record: forwarding");
        self.channel
            .send(Envelope::to_controller(self.identity, request.into_message()))
            .await?;
        self.stats.queries_forwarded += 1;
        Ok(())
    }

    async fn finish(mut self) -> Result<RelayStats, ChannelError> {
        write_frame(&mut self.outbound, &PeerRecord::Stop).await?;
        self.outbound.shutdown().await?;
        info!(stats = ?self.stats, "Relay bridge stopped");
        Ok(self.stats)
    }
}

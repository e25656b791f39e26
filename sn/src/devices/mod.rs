//! Sensor and actuator device loops
//!
//! A device introduces itself with `Hello`, waits for the controller's `Ack`, then
//! polls its own route key until the controller sends `Stop` or the process is
//! interrupted. Loops report what they do through a [`DeviceEvent`] callback so the
//! binaries can print it and tests can collect it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, DeviceKind, Envelope, Identity, Message, MessageChannel, ReceiveMode, RouteKey};
use crate::shutdown::ShutdownFlag;

pub mod actuator;
pub mod sensor;

pub use actuator::Actuator;
pub use sensor::Sensor;

/// Default pause between inbox polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors from device loops
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("THRESHOLD({threshold}) must not exceed MAX_READING({max_reading})")]
    ThresholdAboveMax { threshold: i32, max_reading: i32 },

    #[error("MAX_READING({0}) must not be negative")]
    NegativeMaxReading(i32),

    #[error("Expected ack from controller but received {0}")]
    UnexpectedHandshake(&'static str),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Why a device loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The controller sent `Stop`
    Stopped,

    /// Local shutdown was requested
    Interrupted,
}

/// Something a device did, reported to its observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected,
    Reading { reading: i32, crossed: bool },
    Command { verb: String, sequence: u64 },
    Query { command: String, sequence: Option<u64> },
    Stopped(StopReason),
}

/// A device's view of the channel
pub(crate) struct DeviceLink {
    channel: Arc<dyn MessageChannel>,
    identity: Identity,
    poll_interval: Duration,
}

impl DeviceLink {
    pub(crate) fn new(channel: Arc<dyn MessageChannel>, identity: Identity, poll_interval: Duration) -> Self {
        Self {
            channel,
            identity,
            poll_interval,
        }
    }

    pub(crate) fn identity(&self) -> Identity {
        self.identity
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Send `Hello` and wait for the controller's `Ack`
    ///
    /// Returns the reason the wait ended early, or `None` once acknowledged.
    pub(crate) async fn handshake(
        &self,
        name: &str,
        kind: DeviceKind,
        threshold: i32,
        shutdown: &ShutdownFlag,
    ) -> Result<Option<StopReason>, DeviceError> {
        debug!(identity = %self.identity, name, %kind, "DeviceLink::handshake: called");
        self.send(Message::Hello {
            name: name.to_string(),
            kind,
            threshold,
        })
        .await?;

        loop {
            if shutdown.is_set() {
                return Ok(Some(StopReason::Interrupted));
            }
            match self.poll().await? {
                Some(Message::Ack { .. }) => {
                    info!(identity = %self.identity, "Connection with controller established");
                    return Ok(None);
                }
                Some(Message::Stop) => return Ok(Some(StopReason::Stopped)),
                Some(other) => return Err(DeviceError::UnexpectedHandshake(other.kind_name())),
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    /// Take the next message addressed to this device, if any
    pub(crate) async fn poll(&self) -> Result<Option<Message>, ChannelError> {
        let envelope = self
            .channel
            .receive(RouteKey::Identity(self.identity), ReceiveMode::NonBlocking)
            .await?;
        Ok(envelope.map(|e| e.message))
    }

    pub(crate) async fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.channel.send(Envelope::to_controller(self.identity, message)).await
    }

    pub(crate) fn unexpected(&self, message: &Message) {
        warn!(identity = %self.identity, kind = message.kind_name(), "Unexpected message dropped");
    }
}

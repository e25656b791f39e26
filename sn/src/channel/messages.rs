//! Channel message types
//!
//! Every participant exchanges [`Envelope`]s over the message channel. The body is a
//! tagged [`Message`] that carries only the fields its purpose needs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a display name in bytes
pub const MAX_NAME_LENGTH: usize = 64;

/// Maximum length of any payload text (commands, error text) in bytes
pub const MAX_DATA_LENGTH: usize = 512;

/// Command verb sent to an actuator when its paired sensor crosses threshold
pub const TURN_OFF: &str = "turn off";

/// Process-level identity of a participant
///
/// Used both as the sender tag and as the addressing key for replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub u32);

impl Identity {
    /// Identity of the calling process (its PID)
    pub fn current() -> Self {
        Self(nix::unistd::getpid().as_raw() as u32)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Identity {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Destination of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteKey {
    /// Broadcast sentinel: addressed to the controller rather than a device
    Controller,

    /// Addressed to one specific participant
    Identity(Identity),
}

/// The broadcast key every device uses to reach the controller
pub const TO_CONTROLLER: RouteKey = RouteKey::Controller;

impl From<Identity> for RouteKey {
    fn from(identity: Identity) -> Self {
        Self::Identity(identity)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controller => write!(f, "controller"),
            Self::Identity(id) => write!(f, "{}", id),
        }
    }
}

/// Kind of device attached to the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Sensor,
    Actuator,
}

impl DeviceKind {
    /// The kind a device of this kind pairs with
    pub fn opposite(self) -> Self {
        match self {
            Self::Sensor => Self::Actuator,
            Self::Actuator => Self::Sensor,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor => write!(f, "Sensor"),
            Self::Actuator => write!(f, "Actuator"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sensor" | "s" => Ok(Self::Sensor),
            "actuator" | "a" => Ok(Self::Actuator),
            _ => Err(format!("Unknown device kind: {}. Use: sensor or actuator", s)),
        }
    }
}

/// Registered attributes of a device at the time an event was built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub identity: Identity,
    pub name: String,
    pub kind: DeviceKind,
    pub threshold: i32,
}

/// What caused a relay event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayTrigger {
    /// A sensor reading reached its threshold and a command went to its actuator
    ThresholdCrossed {
        actuator: Identity,
        command: String,
        sequence: u64,
    },

    /// A device answered a query issued by the peer
    QueryAnswered,
}

/// Summarized device state transition destined for the external peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub device: DeviceSnapshot,
    pub reading: Option<i32>,
    pub trigger: RelayTrigger,
    pub at: DateTime<Utc>,
}

impl RelayEvent {
    /// Create an event stamped with the current time
    pub fn new(device: DeviceSnapshot, reading: Option<i32>, trigger: RelayTrigger) -> Self {
        Self {
            device,
            reading,
            trigger,
            at: Utc::now(),
        }
    }
}

/// Message bodies, one variant per purpose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Device introduces itself to the controller
    Hello {
        name: String,
        kind: DeviceKind,
        threshold: i32,
    },

    /// Handshake acknowledgement (controller) or command acknowledgement (actuator)
    Ack { sequence: Option<u64> },

    /// Periodic sensor reading
    Reading { reading: i32 },

    /// Command for an actuator
    Command { verb: String, sequence: u64 },

    /// Query forwarded from the peer to a device
    Query { command: String, sequence: Option<u64> },

    /// A device's answer to a query
    QueryResponse { reading: Option<i32> },

    /// Query issued by the peer, sent by the relay bridge
    PeerQuery {
        target: Identity,
        kind: DeviceKind,
        command: String,
    },

    /// Event for the relay bridge to forward to the peer
    Relay { event: RelayEvent },

    /// Error for the relay bridge to forward to the peer
    QueryError { message: String },

    /// Request to stop
    Stop,
}

impl Message {
    /// Short name of the variant for logging
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Ack { .. } => "ack",
            Self::Reading { .. } => "reading",
            Self::Command { .. } => "command",
            Self::Query { .. } => "query",
            Self::QueryResponse { .. } => "query-response",
            Self::PeerQuery { .. } => "peer-query",
            Self::Relay { .. } => "relay",
            Self::QueryError { .. } => "query-error",
            Self::Stop => "stop",
        }
    }

    /// Truncate every text field to its declared bound
    pub fn bounded(mut self) -> Self {
        match &mut self {
            Self::Hello { name, .. } => truncate_bounded(name, MAX_NAME_LENGTH),
            Self::Command { verb, .. } => truncate_bounded(verb, MAX_DATA_LENGTH),
            Self::Query { command, .. } | Self::PeerQuery { command, .. } => {
                truncate_bounded(command, MAX_DATA_LENGTH)
            }
            Self::QueryError { message } => truncate_bounded(message, MAX_DATA_LENGTH),
            Self::Relay { event } => {
                truncate_bounded(&mut event.device.name, MAX_NAME_LENGTH);
                if let RelayTrigger::ThresholdCrossed { command, .. } = &mut event.trigger {
                    truncate_bounded(command, MAX_DATA_LENGTH);
                }
            }
            Self::Ack { .. } | Self::Reading { .. } | Self::QueryResponse { .. } | Self::Stop => {}
        }
        self
    }
}

/// A routed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub route: RouteKey,
    pub sender: Identity,
    pub message: Message,
}

impl Envelope {
    pub fn new(route: impl Into<RouteKey>, sender: Identity, message: Message) -> Self {
        Self {
            route: route.into(),
            sender,
            message,
        }
    }

    /// Envelope addressed to the controller
    pub fn to_controller(sender: Identity, message: Message) -> Self {
        Self::new(TO_CONTROLLER, sender, message)
    }

    /// Same envelope with all text fields truncated to their bounds
    pub fn bounded(self) -> Self {
        Self {
            message: self.message.bounded(),
            ..self
        }
    }
}

/// Truncate `text` to at most `max` bytes without splitting a character
pub fn truncate_bounded(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

//! Sensornet - sensor/actuator monitoring network
//!
//! A controller process registers sensors and actuators as they introduce
//! themselves, pairs each sensor with an actuator in arrival order, and switches an
//! actuator off when its sensor crosses its threshold. Every crossing and every
//! answered query is relayed to an external peer (the cloud), which can also query
//! any registered device.
//!
//! # Modules
//!
//! - [`channel`] - Message channel, its in-memory queue and its socket transport
//! - [`controller`] - Device registry, pairing queue and dispatch engine
//! - [`relay`] - Relay bridge between the channel and the peer
//! - [`devices`] - Sensor and actuator loops
//! - [`cloud`] - The peer end of the relay
//! - [`shutdown`] - Shutdown flag, relay wake-up and signal handling
//! - [`config`] - Configuration types and loading
//! - [`logging`] - Log file setup
//! - [`cli`] - Command-line interfaces

pub mod channel;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod controller;
pub mod devices;
pub mod logging;
pub mod relay;
pub mod shutdown;

// Re-export commonly used types
pub use channel::{
    ChannelClient, ChannelError, ChannelServer, DeviceKind, Envelope, Identity, MemoryChannel, Message,
    MessageChannel, ReceiveMode, RelayEvent, RouteKey, TO_CONTROLLER,
};
pub use config::Config;
pub use controller::{
    ControllerReport, ControllerSettings, DispatchOutcome, Dispatcher, PairingQueue, QueryRejection, Registry,
    run_controller,
};
pub use devices::{Actuator, DeviceError, DeviceEvent, Sensor, StopReason};
pub use relay::{PeerRecord, PeerRequest, RelayBridge, RelayStats};
pub use shutdown::{RelayWake, ShutdownFlag, spawn_signal_listener};

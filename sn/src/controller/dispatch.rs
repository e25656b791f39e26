//! Dispatch engine
//!
//! Consumes messages addressed to the controller, keeps the registry and pairing
//! queue current, and answers with acknowledgements, commands, forwarded queries and
//! relay events. Rules are checked in a fixed order:
//!
//! 1. queries from the relay bridge
//! 2. hello from an unseen device
//! 3. acknowledgements from actuators
//! 4. query responses from devices
//! 5. sensor readings at or above threshold
//!
//! Anything else is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::pairing::{PairingOutcome, PairingQueue};
use super::registry::{DeviceIndex, Registry};
use crate::channel::messages::TURN_OFF;
use crate::channel::{
    ChannelError, DeviceKind, DeviceSnapshot, Envelope, Identity, Message, MessageChannel, ReceiveMode, RelayEvent,
    RelayTrigger, RouteKey, TO_CONTROLLER,
};
use crate::shutdown::{RelayWake, ShutdownFlag};

/// Default pause after a receive that found nothing
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why a peer query was not forwarded
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryRejection {
    #[error("Device with PID={0} does not exist")]
    UnknownDevice(Identity),

    #[error("Device with PID={identity} is a {actual}, not a {requested}")]
    KindMismatch {
        identity: Identity,
        requested: DeviceKind,
        actual: DeviceKind,
    },
}

impl QueryRejection {
    /// Error text delivered to the peer
    pub fn payload(&self) -> String {
        format!("error: {}", self)
    }
}

/// What the engine did with one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Peer query sent on to the target device
    QueryForwarded { target: Identity, sequence: Option<u64> },

    /// Peer query answered with an error
    QueryRejected { target: Identity, rejection: QueryRejection },

    /// New device registered and acknowledged
    Registered {
        identity: Identity,
        index: DeviceIndex,
        pairing: Option<PairingOutcome>,
    },

    /// Registry full; hello dropped
    RegistrationDropped { identity: Identity },

    /// Non-hello message from a sender that never registered
    Unregistered { identity: Identity },

    /// Actuator acknowledged a command
    ActuatorAcknowledged { actuator: Identity, sequence: Option<u64> },

    /// Device answered a query; event sent to the relay bridge
    QueryRelayed { identity: Identity },

    /// Sensor crossed threshold; command sent to its actuator
    CommandIssued {
        sensor: Identity,
        actuator: Identity,
        sequence: u64,
    },

    /// Sensor crossed threshold but has no actuator
    NoActuatorMapped { sensor: Identity, reading: i32 },

    /// Sensor reading below threshold
    ReadingLogged { sensor: Identity, reading: i32 },

    /// Logged and dropped
    Ignored { identity: Identity, kind: &'static str },
}

/// The controller's dispatch engine
pub struct Dispatcher {
    channel: Arc<dyn MessageChannel>,
    wake: RelayWake,
    identity: Identity,
    relay: Identity,
    registry: Registry,
    pairing: PairingQueue,
    last_sequence: u64,
    poll_interval: Duration,
    drained: bool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("identity", &self.identity)
            .field("relay", &self.relay)
            .field("registry", &self.registry)
            .field("pairing", &self.pairing)
            .field("last_sequence", &self.last_sequence)
            .finish()
    }
}

impl Dispatcher {
    /// Create an engine that sends as `identity` and treats `relay` as the relay bridge
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        wake: RelayWake,
        identity: Identity,
        relay: Identity,
        registry_capacity: usize,
    ) -> Self {
        debug!(%identity, %relay, registry_capacity, "Dispatcher::new: called");
        Self {
            channel,
            wake,
            identity,
            relay,
            registry: Registry::with_capacity(registry_capacity),
            pairing: PairingQueue::new(),
            last_sequence: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            drained: false,
        }
    }

    /// Set the pause after an empty receive
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pairing(&self) -> &PairingQueue {
        &self.pairing
    }

    /// Sequence number of the most recent actuator-bound message (0 before the first)
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Dispatch until shutdown is requested, then stop every device
    ///
    /// Returns the number of devices sent a stop message.
    pub async fn run(&mut self, shutdown: &ShutdownFlag) -> Result<usize, ChannelError> {
        info!("Dispatch engine started");

        while !shutdown.is_set() {
            match self.channel.receive(TO_CONTROLLER, ReceiveMode::NonBlocking).await? {
                Some(envelope) => {
                    let outcome = self.dispatch(envelope).await?;
                    debug!(?outcome, "Dispatcher::run: dispatched");
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }

        info!("Dispatch engine shutting down");
        self.drain().await
    }

    /// Handle one inbound message
    pub async fn dispatch(&mut self, envelope: Envelope) -> Result<DispatchOutcome, ChannelError> {
        let Envelope { sender, message, .. } = envelope;
        debug!(%sender, kind = message.kind_name(), "Dispatcher::dispatch: called");

        if sender == self.relay {
            return match message {
                Message::PeerQuery { target, kind, command } => self.forward_peer_query(target, kind, command).await,
                other => {
                    warn!(kind = other.kind_name(), "Unexpected message from relay bridge dropped");
                    Ok(DispatchOutcome::Ignored {
                        identity: sender,
                        kind: other.kind_name(),
                    })
                }
            };
        }

        let Some((index, device)) = self.registry.entry(sender) else {
            return match message {
                Message::Hello { name, kind, threshold } => self.register(sender, name, kind, threshold).await,
                other => {
                    warn!(%sender, kind = other.kind_name(), "Message from unregistered device dropped");
                    Ok(DispatchOutcome::Unregistered { identity: sender })
                }
            };
        };
        let snapshot = device.snapshot();
        let partner = self.registry.partner_of(index).map(|partner| partner.identity);

        match (snapshot.kind, message) {
            (DeviceKind::Actuator, Message::Ack { sequence }) => {
                info!(actuator = %sender, ?sequence, "Actuator acknowledged command");
                Ok(DispatchOutcome::ActuatorAcknowledged {
                    actuator: sender,
                    sequence,
                })
            }
            (_, Message::QueryResponse { reading }) => self.relay_query_response(snapshot, reading).await,
            (DeviceKind::Sensor, Message::Reading { reading }) if reading >= snapshot.threshold => {
                self.handle_crossing(snapshot, partner, reading).await
            }
            (DeviceKind::Sensor, Message::Reading { reading }) => {
                info!(sensor = %sender, reading, threshold = snapshot.threshold, "Sensor reading");
                Ok(DispatchOutcome::ReadingLogged { sensor: sender, reading })
            }
            (_, other) => {
                info!(%sender, kind = other.kind_name(), "Message dropped");
                Ok(DispatchOutcome::Ignored {
                    identity: sender,
                    kind: other.kind_name(),
                })
            }
        }
    }

    /// Send `Stop` to every registered device and release the pairing queue
    ///
    /// Runs once; later calls send nothing and return 0.
    pub async fn drain(&mut self) -> Result<usize, ChannelError> {
        if self.drained {
            debug!("Dispatcher::drain: already drained");
            return Ok(0);
        }
        self.drained = true;

        let targets: Vec<Identity> = self.registry.iter().map(|device| device.identity).collect();
        for target in &targets {
            debug!(%target, "Dispatcher::drain: sending stop");
            self.send(*target, Message::Stop).await?;
        }
        self.pairing.release();

        info!(devices = targets.len(), "Stop sent to all devices");
        Ok(targets.len())
    }

    async fn forward_peer_query(
        &mut self,
        target: Identity,
        requested: DeviceKind,
        command: String,
    ) -> Result<DispatchOutcome, ChannelError> {
        debug!(%target, %requested, %command, "Dispatcher::forward_peer_query: called");

        let Some(actual) = self.registry.device(target).map(|device| device.kind) else {
            return self.reject_query(target, QueryRejection::UnknownDevice(target)).await;
        };

        if actual != requested {
            let rejection = QueryRejection::KindMismatch {
                identity: target,
                requested,
                actual,
            };
            return self.reject_query(target, rejection).await;
        }

        let sequence = match actual {
            DeviceKind::Actuator => Some(self.next_sequence()),
            DeviceKind::Sensor => None,
        };
        self.send(target, Message::Query { command, sequence }).await?;
        info!(%target, ?sequence, "Peer query forwarded");
        Ok(DispatchOutcome::QueryForwarded { target, sequence })
    }

    async fn reject_query(
        &mut self,
        target: Identity,
        rejection: QueryRejection,
    ) -> Result<DispatchOutcome, ChannelError> {
        warn!(%target, %rejection, "Peer query rejected");
        self.send_to_relay(Message::QueryError {
            message: rejection.payload(),
        })
        .await?;
        Ok(DispatchOutcome::QueryRejected { target, rejection })
    }

    async fn register(
        &mut self,
        identity: Identity,
        name: String,
        kind: DeviceKind,
        threshold: i32,
    ) -> Result<DispatchOutcome, ChannelError> {
        let index = match self.registry.register(identity, name, kind, threshold) {
            Ok(index) => index,
            Err(e) => {
                warn!(%identity, error = %e, "Registration dropped");
                return Ok(DispatchOutcome::RegistrationDropped { identity });
            }
        };

        let pairing = self.pairing.offer(&mut self.registry, index);
        match pairing {
            Some(PairingOutcome::Paired { sensor, actuator }) => {
                let sensor = self.registry.get(sensor).map(|d| d.identity);
                let actuator = self.registry.get(actuator).map(|d| d.identity);
                info!(?sensor, ?actuator, "Sensor paired with actuator");
            }
            Some(PairingOutcome::Queued { kind, position }) => {
                info!(%identity, %kind, position, "Device waiting for a partner");
            }
            None => {}
        }

        self.send(identity, Message::Ack { sequence: None }).await?;
        info!(%identity, %kind, threshold, "Device registered");
        Ok(DispatchOutcome::Registered {
            identity,
            index,
            pairing,
        })
    }

    async fn relay_query_response(
        &mut self,
        device: DeviceSnapshot,
        reading: Option<i32>,
    ) -> Result<DispatchOutcome, ChannelError> {
        let identity = device.identity;
        let event = RelayEvent::new(device, reading, RelayTrigger::QueryAnswered);

        self.send_to_relay(Message::Relay { event }).await?;
        info!(%identity, ?reading, "Query response relayed");
        Ok(DispatchOutcome::QueryRelayed { identity })
    }

    async fn handle_crossing(
        &mut self,
        sensor: DeviceSnapshot,
        actuator: Option<Identity>,
        reading: i32,
    ) -> Result<DispatchOutcome, ChannelError> {
        let Some(actuator) = actuator else {
            warn!(
                sensor = %sensor.identity,
                reading,
                threshold = sensor.threshold,
                "Threshold crossed but no actuator mapped"
            );
            return Ok(DispatchOutcome::NoActuatorMapped {
                sensor: sensor.identity,
                reading,
            });
        };

        let sequence = self.next_sequence();
        self.send(
            actuator,
            Message::Command {
                verb: TURN_OFF.to_string(),
                sequence,
            },
        )
        .await?;

        let identity = sensor.identity;
        let event = RelayEvent::new(
            sensor,
            Some(reading),
            RelayTrigger::ThresholdCrossed {
                actuator,
                command: TURN_OFF.to_string(),
                sequence,
            },
        );
        self.send_to_relay(Message::Relay { event }).await?;

        info!(sensor = %identity, %actuator, reading, sequence, "Threshold crossed, command issued");
        Ok(DispatchOutcome::CommandIssued {
            sensor: identity,
            actuator,
            sequence,
        })
    }

    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    async fn send(&self, to: Identity, message: Message) -> Result<(), ChannelError> {
        self.channel
            .send(Envelope::new(RouteKey::Identity(to), self.identity, message))
            .await
    }

    async fn send_to_relay(&self, message: Message) -> Result<(), ChannelError> {
        self.send(self.relay, message).await?;
        self.wake.raise();
        Ok(())
    }
}

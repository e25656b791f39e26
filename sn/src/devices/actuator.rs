//! Actuator device

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{DeviceError, DeviceEvent, DeviceLink, StopReason};
use crate::channel::{DeviceKind, Identity, Message, MessageChannel};
use crate::shutdown::ShutdownFlag;

/// Executes commands from the controller and acknowledges each one
#[derive(Debug)]
pub struct Actuator {
    name: String,
    executed: u64,
}

impl Actuator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executed: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of commands executed so far
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Register with the controller and execute commands until stopped
    pub async fn run(
        &mut self,
        channel: Arc<dyn MessageChannel>,
        identity: Identity,
        poll_interval: Duration,
        shutdown: &ShutdownFlag,
        mut observe: impl FnMut(&DeviceEvent),
    ) -> Result<StopReason, DeviceError> {
        let link = DeviceLink::new(channel, identity, poll_interval);
        let reason = self.serve(&link, shutdown, &mut observe).await?;
        observe(&DeviceEvent::Stopped(reason));
        info!(%identity, ?reason, executed = self.executed, "Actuator stopped");
        Ok(reason)
    }

    async fn serve(
        &mut self,
        link: &DeviceLink,
        shutdown: &ShutdownFlag,
        observe: &mut impl FnMut(&DeviceEvent),
    ) -> Result<StopReason, DeviceError> {
        // Actuators carry no threshold of their own
        if let Some(reason) = link.handshake(&self.name, DeviceKind::Actuator, 0, shutdown).await? {
            return Ok(reason);
        }
        observe(&DeviceEvent::Connected);

        loop {
            if shutdown.is_set() {
                return Ok(StopReason::Interrupted);
            }

            let Some(message) = link.poll().await? else {
                tokio::time::sleep(link.poll_interval()).await;
                continue;
            };

            match message {
                Message::Stop => return Ok(StopReason::Stopped),
                Message::Command { verb, sequence } => {
                    debug!(identity = %link.identity(), %verb, sequence, "Actuator::serve: executing command");
                    self.executed += 1;
                    observe(&DeviceEvent::Command { verb, sequence });
                    link.send(Message::Ack {
                        sequence: Some(sequence),
                    })
                    .await?;
                }
                Message::Query { command, sequence } => {
                    debug!(identity = %link.identity(), %command, ?sequence, "Actuator::serve: answering query");
                    observe(&DeviceEvent::Query { command, sequence });
                    link.send(Message::QueryResponse { reading: None }).await?;
                }
                other => link.unexpected(&other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::messages::TURN_OFF;
    use crate::channel::{Envelope, MemoryChannel, ReceiveMode, RouteKey, TO_CONTROLLER};
    use std::sync::Mutex;

    const ACTUATOR: Identity = Identity(20);

    async fn next_to_controller(channel: &MemoryChannel) -> Message {
        tokio::time::timeout(Duration::from_secs(5), channel.receive(TO_CONTROLLER, ReceiveMode::Blocking))
            .await
            .expect("message should arrive")
            .unwrap()
            .unwrap()
            .message
    }

    async fn reply(channel: &MemoryChannel, message: Message) {
        channel
            .send(Envelope::new(RouteKey::Identity(ACTUATOR), Identity(1), message))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_actuator_session() {
        let channel = Arc::new(MemoryChannel::new());
        let shutdown = ShutdownFlag::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let channel = channel.clone();
            let shutdown = shutdown.clone();
            let events = events.clone();
            tokio::spawn(async move {
                let mut actuator = Actuator::new("fan");
                let reason = actuator
                    .run(channel, ACTUATOR, Duration::from_millis(5), &shutdown, |event| {
                        events.lock().unwrap().push(event.clone())
                    })
                    .await;
                (reason, actuator.executed())
            })
        };

        assert_eq!(
            next_to_controller(&channel).await,
            Message::Hello {
                name: "fan".to_string(),
                kind: DeviceKind::Actuator,
                threshold: 0
            }
        );
        reply(&channel, Message::Ack { sequence: None }).await;

        reply(
            &channel,
            Message::Command {
                verb: TURN_OFF.to_string(),
                sequence: 7,
            },
        )
        .await;
        assert_eq!(next_to_controller(&channel).await, Message::Ack { sequence: Some(7) });

        reply(
            &channel,
            Message::Query {
                command: "status".to_string(),
                sequence: Some(8),
            },
        )
        .await;
        assert_eq!(
            next_to_controller(&channel).await,
            Message::QueryResponse { reading: None }
        );

        reply(&channel, Message::Stop).await;
        let (reason, executed) = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("actuator should stop")
            .unwrap();
        assert_eq!(reason.unwrap(), StopReason::Stopped);
        assert_eq!(executed, 1);

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                DeviceEvent::Connected,
                DeviceEvent::Command {
                    verb: TURN_OFF.to_string(),
                    sequence: 7
                },
                DeviceEvent::Query {
                    command: "status".to_string(),
                    sequence: Some(8)
                },
                DeviceEvent::Stopped(StopReason::Stopped),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_during_handshake() {
        let channel = Arc::new(MemoryChannel::new());
        let shutdown = ShutdownFlag::new();
        reply(&channel, Message::Stop).await;

        let mut actuator = Actuator::new("fan");
        let reason = actuator
            .run(channel.clone(), ACTUATOR, Duration::from_millis(5), &shutdown, |_| {})
            .await
            .unwrap();
        assert_eq!(reason, StopReason::Stopped);
    }
}

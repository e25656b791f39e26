//! The controller process
//!
//! Hosts the message channel for device processes, runs the dispatch engine, and runs
//! the relay bridge to the external peer. The engine and the bridge are two tasks that
//! share the channel, the shutdown flag and the relay wake-up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use crate::channel::{ChannelServer, Identity, MemoryChannel, Message, MessageChannel};
use crate::config::Config;
use crate::relay::{RelayBridge, RelayStats, connect_peer};
use crate::shutdown::{RelayWake, ShutdownFlag};

pub mod dispatch;
pub mod pairing;
pub mod registry;

pub use dispatch::{DispatchOutcome, Dispatcher, QueryRejection};
pub use pairing::{PairingOutcome, PairingQueue};
pub use registry::{Device, DeviceIndex, Registry, RegistryError};

/// How long devices get to collect their `Stop` before the channel closes
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Settings for one controller run
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub channel_socket: PathBuf,
    pub peer_socket: PathBuf,
    pub registry_capacity: usize,
    pub max_pending: usize,
    pub poll_interval: Duration,
    pub relay_poll_interval: Duration,
    pub stop_grace: Duration,
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            channel_socket: config.channel.socket_path(),
            peer_socket: config.peer.socket_path(),
            registry_capacity: config.controller.registry_capacity,
            max_pending: config.channel.max_pending,
            poll_interval: config.channel.poll_interval(),
            relay_poll_interval: config.controller.relay_poll_interval(),
            stop_grace: STOP_GRACE,
        }
    }
}

/// Summary of a finished controller run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerReport {
    pub identity: Identity,
    pub devices_stopped: usize,
    pub relay: RelayStats,
}

/// Run the controller until `shutdown` is triggered
///
/// Fails before any task starts if the channel socket cannot be bound or the peer
/// cannot be reached. Afterwards a task error triggers shutdown for the other task and
/// is returned once both have finished.
pub async fn run_controller(settings: ControllerSettings, shutdown: ShutdownFlag) -> Result<ControllerReport> {
    debug!(?settings, "run_controller: called");
    let identity = Identity::current();

    let server = ChannelServer::bind_at(&settings.channel_socket)
        .context(format!("Failed to serve channel at {}", settings.channel_socket.display()))?;
    let (inbound, outbound) = connect_peer(&settings.peer_socket)
        .await
        .context(format!("Failed to reach peer at {}", settings.peer_socket.display()))?;

    let channel = Arc::new(MemoryChannel::with_max_pending(settings.max_pending));
    let wake = RelayWake::new();

    // The server outlives the engine so devices can still collect their Stop
    let server_shutdown = ShutdownFlag::new();
    let server_task = {
        let channel: Arc<dyn MessageChannel> = channel.clone();
        tokio::spawn(server.run(channel, server_shutdown.clone()))
    };

    let relay_task = {
        let bridge = RelayBridge::new(identity, channel.clone(), wake.clone(), inbound, outbound)
            .with_poll_interval(settings.relay_poll_interval);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = bridge.run(&shutdown).await;
            if let Err(e) = &result {
                warn!(error = %e, "Relay bridge failed");
                shutdown.trigger();
            }
            result
        })
    };

    let dispatch_task = {
        let mut dispatcher = Dispatcher::new(
            channel.clone(),
            wake,
            identity,
            identity,
            settings.registry_capacity,
        )
        .with_poll_interval(settings.poll_interval);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = dispatcher.run(&shutdown).await;
            if let Err(e) = &result {
                warn!(error = %e, "Dispatch engine failed");
                shutdown.trigger();
            }
            result
        })
    };

    info!(%identity, "Controller running");

    let devices_stopped = dispatch_task.await.context("Dispatch engine task panicked")?;
    let relay = relay_task.await.context("Relay bridge task panicked")?;

    wait_for_pickup(&channel, settings.stop_grace).await;
    server_shutdown.trigger();
    channel.close();
    if let Err(e) = server_task.await.context("Channel server task panicked")? {
        warn!(error = %e, "Channel server failed");
    }

    let devices_stopped = devices_stopped.context("Dispatch engine failed")?;
    let relay = relay.context("Relay bridge failed")?;
    info!(devices_stopped, ?relay, "Controller stopped");

    Ok(ControllerReport {
        identity,
        devices_stopped,
        relay,
    })
}

/// Wait until every queued `Stop` was received or `grace` elapsed
async fn wait_for_pickup(channel: &MemoryChannel, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let pending = channel.count_matching(|envelope| envelope.message == Message::Stop).await;
        if pending == 0 {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(pending, "Stop messages left undelivered at shutdown");
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Envelope;
    use tempfile::TempDir;

    fn settings(temp: &TempDir) -> ControllerSettings {
        ControllerSettings {
            channel_socket: temp.path().join("channel.sock"),
            peer_socket: temp.path().join("cloud.sock"),
            registry_capacity: 4,
            max_pending: 16,
            poll_interval: Duration::from_millis(5),
            relay_poll_interval: Duration::from_millis(5),
            stop_grace: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config::default();
        let settings = ControllerSettings::from(&config);
        assert_eq!(settings.registry_capacity, config.controller.registry_capacity);
        assert_eq!(settings.max_pending, config.channel.max_pending);
        assert_eq!(settings.stop_grace, STOP_GRACE);
        assert!(settings.peer_socket.ends_with("cloud.sock"));
    }

    #[tokio::test]
    async fn test_missing_peer_is_fatal() {
        let temp = TempDir::new().unwrap();
        let result = run_controller(settings(&temp), ShutdownFlag::new()).await;
        let error = result.unwrap_err().to_string();
        assert!(error.contains("Failed to reach peer"));
    }

    #[tokio::test]
    async fn test_wait_for_pickup_gives_up() {
        let channel = MemoryChannel::new();
        channel
            .send(Envelope::new(Identity(9), Identity(1), Message::Stop))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        wait_for_pickup(&channel, Duration::from_millis(50)).await;
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(channel.len().await, 1);
    }

    #[tokio::test]
    async fn test_wait_for_pickup_ignores_other_traffic() {
        let channel = MemoryChannel::new();
        channel
            .send(Envelope::to_controller(Identity(9), Message::Reading { reading: 1 }))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        wait_for_pickup(&channel, Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

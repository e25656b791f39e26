//! Sensornet actuator
//!
//! Executes commands from the controller and acknowledges each one.

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use sensornet::channel::ChannelClient;
use sensornet::cli::ActuatorCli;
use sensornet::config::Config;
use sensornet::devices::{Actuator, DeviceEvent, StopReason};
use sensornet::shutdown::{ShutdownFlag, spawn_signal_listener};
use sensornet::{Identity, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ActuatorCli::parse();

    let config = Config::load(cli.common.config.as_ref()).context("Failed to load configuration")?;
    logging::setup("actuator", cli.common.log_level.as_deref(), config.log_level.as_deref())
        .context("Failed to setup logging")?;
    config.validate().context("Invalid configuration")?;

    let identity = Identity::current();
    info!(%identity, name = %cli.name, "Actuator starting");
    println!("{} Device starting. PID={}", "●".cyan(), identity);

    println!("Attempting to establish connection with Controller...");
    let socket_path = config.channel.socket_path();
    let channel = ChannelClient::connect_at(&socket_path)
        .await
        .context(format!("Failed to connect to controller at {}", socket_path.display()))?;

    let shutdown = ShutdownFlag::new();
    let _signals = spawn_signal_listener(shutdown.clone()).context("Failed to install signal handlers")?;

    let mut actuator = Actuator::new(cli.name);
    let reason = actuator
        .run(
            Arc::new(channel),
            identity,
            config.channel.poll_interval(),
            &shutdown,
            print_event,
        )
        .await?;

    info!(?reason, executed = actuator.executed(), "Actuator exiting");
    Ok(())
}

fn print_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Connected => println!("{} Received ack from Controller. Connection established.", "✓".green()),
        DeviceEvent::Command { verb, sequence } => {
            println!(
                "{} Received '{}' with Sequence#={} from Controller",
                "→".yellow().bold(),
                verb,
                sequence
            );
            println!("Sending ack message with Sequence#={} to Controller", sequence);
        }
        DeviceEvent::Query { command, sequence } => match sequence {
            Some(sequence) => println!("Received query '{}' with Sequence#={} from Controller", command, sequence),
            None => println!("Received query '{}' from Controller", command),
        },
        DeviceEvent::Reading { reading, .. } => println!("Reading = {}", reading),
        DeviceEvent::Stopped(StopReason::Stopped) => {
            println!("Received stop command from Controller. Stopping device.")
        }
        DeviceEvent::Stopped(StopReason::Interrupted) => println!("Interrupted. Stopping device."),
    }
}

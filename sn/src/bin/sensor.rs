//! Sensornet sensor
//!
//! Reports a random reading to the controller every report interval.

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use sensornet::channel::ChannelClient;
use sensornet::cli::SensorCli;
use sensornet::config::{Config, DevicesConfig};
use sensornet::devices::{DeviceEvent, Sensor, StopReason};
use sensornet::shutdown::{ShutdownFlag, spawn_signal_listener};
use sensornet::{Identity, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SensorCli::parse();

    // Argument errors come before any I/O
    let sensor = Sensor::new(
        cli.name.clone(),
        cli.threshold,
        cli.max_reading,
        DevicesConfig::default().report_interval(),
    )?;

    let config = Config::load(cli.common.config.as_ref()).context("Failed to load configuration")?;
    logging::setup("sensor", cli.common.log_level.as_deref(), config.log_level.as_deref())
        .context("Failed to setup logging")?;
    config.validate().context("Invalid configuration")?;
    let mut sensor = sensor.with_report_interval(config.devices.report_interval());

    let identity = Identity::current();
    info!(%identity, name = %cli.name, threshold = cli.threshold, max_reading = cli.max_reading, "Sensor starting");
    println!("{} Device starting. PID={}", "●".cyan(), identity);

    println!("Attempting to establish connection with Controller...");
    let socket_path = config.channel.socket_path();
    let channel = ChannelClient::connect_at(&socket_path)
        .await
        .context(format!("Failed to connect to controller at {}", socket_path.display()))?;

    let shutdown = ShutdownFlag::new();
    let _signals = spawn_signal_listener(shutdown.clone()).context("Failed to install signal handlers")?;

    let threshold = sensor.threshold();
    let reason = sensor
        .run(
            Arc::new(channel),
            identity,
            config.channel.poll_interval(),
            &shutdown,
            |event| print_event(event, threshold),
        )
        .await?;

    info!(?reason, "Sensor exiting");
    Ok(())
}

fn print_event(event: &DeviceEvent, threshold: i32) {
    match event {
        DeviceEvent::Connected => println!("{} Received ack from Controller. Connection established.", "✓".green()),
        DeviceEvent::Reading { reading, crossed } => {
            println!("Sensor reading = {}", reading);
            if *crossed {
                println!("{} Sensor reading exceeded THRESHOLD({})!", "!".yellow().bold(), threshold);
            }
        }
        DeviceEvent::Query { command, .. } => println!("Received query '{}' from Controller", command),
        DeviceEvent::Command { verb, sequence } => {
            println!("Received '{}' with Sequence#={} from Controller", verb, sequence)
        }
        DeviceEvent::Stopped(StopReason::Stopped) => {
            println!("Received stop command from Controller. Stopping device.")
        }
        DeviceEvent::Stopped(StopReason::Interrupted) => println!("Interrupted. Stopping device."),
    }
}

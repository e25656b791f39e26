//! Sensornet cloud
//!
//! Serves the peer socket, prints everything the controller relays, and sends
//! device queries typed on stdin as `<sensor|actuator> <pid> [command...]`.

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::io::BufReader;
use tracing::info;

use sensornet::channel::{Identity, RelayEvent, RelayTrigger};
use sensornet::cli::CloudCli;
use sensornet::cloud::{CloudEvent, CloudServer, SessionEnd, run_session, spawn_stdin_reader};
use sensornet::config::Config;
use sensornet::logging;
use sensornet::relay::{PeerRecord, PeerRequest};
use sensornet::shutdown::{ShutdownFlag, spawn_signal_listener};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CloudCli::parse();

    let config = Config::load(cli.common.config.as_ref()).context("Failed to load configuration")?;
    logging::setup("cloud", cli.common.log_level.as_deref(), config.log_level.as_deref())
        .context("Failed to setup logging")?;
    config.validate().context("Invalid configuration")?;

    let identity = Identity::current();
    info!(%identity, name = %cli.name, "Cloud starting");
    println!("{} Cloud '{}' starting. PID={}", "●".cyan(), cli.name.bold(), identity);

    let socket_path = config.peer.socket_path();
    let server = CloudServer::bind_at(&socket_path)
        .context(format!("Failed to serve peer socket at {}", socket_path.display()))?;
    println!("Waiting for Controller on {}", socket_path.display());

    let shutdown = ShutdownFlag::new();
    let _signals = spawn_signal_listener(shutdown.clone()).context("Failed to install signal handlers")?;

    let Some(stream) = server.accept(&shutdown).await? else {
        println!("Interrupted before the Controller connected.");
        return Ok(());
    };
    println!("{} Controller connected. Query with: <sensor|actuator> <pid> [command...]", "✓".green());

    let (read_half, write_half) = stream.into_split();
    let end = run_session(
        BufReader::new(read_half),
        write_half,
        spawn_stdin_reader(),
        &shutdown,
        print_event,
    )
    .await?;

    match end {
        SessionEnd::ControllerStopped => println!("Received stop from Controller. Stopping cloud."),
        SessionEnd::ControllerHungUp => println!("{} Controller disconnected.", "!".yellow().bold()),
        SessionEnd::Interrupted => println!("Interrupted. Stopping cloud."),
    }
    info!(?end, "Cloud exiting");
    Ok(())
}

fn print_event(event: &CloudEvent) {
    match event {
        CloudEvent::Record(PeerRecord::Event { event }) => print_relay_event(event),
        CloudEvent::Record(PeerRecord::Error { message }) => println!("{} {}", "Error:".red(), message),
        CloudEvent::Record(PeerRecord::Stop) => {}
        CloudEvent::RequestSent(PeerRequest { kind, identity, command }) => {
            println!("Sent '{}' to {} with PID={}", command, kind, identity)
        }
        CloudEvent::InputRejected { error, .. } => println!("{} {}", "Invalid input:".red(), error),
    }
}

fn print_relay_event(event: &RelayEvent) {
    let device = &event.device;
    let reading = event
        .reading
        .map(|reading| reading.to_string())
        .unwrap_or_else(|| "-".to_string());
    let stamp = event.at.format("%H:%M:%S");

    match &event.trigger {
        RelayTrigger::ThresholdCrossed {
            actuator,
            command,
            sequence,
        } => println!(
            "[{}] {} {} '{}' (PID={}) reading={} threshold={}: sent '{}' to PID={} (Sequence#={})",
            stamp,
            "ALERT".red().bold(),
            device.kind,
            device.name,
            device.identity,
            reading,
            device.threshold,
            command,
            actuator,
            sequence
        ),
        RelayTrigger::QueryAnswered => println!(
            "[{}] {} {} '{}' (PID={}) reading={} threshold={}",
            stamp,
            "QUERY".cyan().bold(),
            device.kind,
            device.name,
            device.identity,
            reading,
            device.threshold
        ),
    }
}

//! Sensornet controller
//!
//! Serves the message channel, pairs devices and relays events to the cloud.

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use sensornet::cli::ControllerCli;
use sensornet::config::Config;
use sensornet::controller::{ControllerSettings, run_controller};
use sensornet::shutdown::{ShutdownFlag, spawn_signal_listener};
use sensornet::{Identity, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ControllerCli::parse();

    let config = Config::load(cli.common.config.as_ref()).context("Failed to load configuration")?;
    logging::setup("controller", cli.common.log_level.as_deref(), config.log_level.as_deref())
        .context("Failed to setup logging")?;
    config.validate().context("Invalid configuration")?;

    let settings = ControllerSettings::from(&config);
    info!(name = %cli.name, ?settings, "Controller starting");
    println!(
        "{} Controller '{}' starting. PID={}",
        "●".cyan(),
        cli.name.bold(),
        Identity::current()
    );
    println!("  channel: {}", settings.channel_socket.display());
    println!("  peer:    {}", settings.peer_socket.display());

    let shutdown = ShutdownFlag::new();
    let _signals = spawn_signal_listener(shutdown.clone()).context("Failed to install signal handlers")?;

    let report = run_controller(settings, shutdown).await?;

    println!(
        "{} Controller stopped: {} device(s) stopped, {} event(s) and {} error(s) relayed, {} peer quer(ies) received",
        "✓".green(),
        report.devices_stopped,
        report.relay.events_forwarded,
        report.relay.errors_forwarded,
        report.relay.queries_forwarded
    );
    Ok(())
}

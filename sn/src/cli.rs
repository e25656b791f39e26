//! CLI definitions for the controller, device and cloud binaries

use std::path::PathBuf;

use clap::{Args, Parser};

use crate::devices::sensor::{DEFAULT_MAX_READING, DEFAULT_THRESHOLD};
use crate::logging::get_log_path;

/// Flags shared by every binary
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Path to config file
    #[arg(short, long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", help = "Log level (overrides config)")]
    pub log_level: Option<String>,
}

/// Sensornet controller: registers devices, pairs them and relays to the cloud
#[derive(Debug, Parser)]
#[command(
    name = "controller",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help("controller")
)]
pub struct ControllerCli {
    /// Display name
    pub name: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Sensornet sensor: reports a reading to the controller periodically
#[derive(Debug, Parser)]
#[command(
    name = "sensor",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help("sensor")
)]
pub struct SensorCli {
    /// Display name
    pub name: String,

    /// Reading at or above which the paired actuator is switched off
    #[arg(default_value_t = DEFAULT_THRESHOLD, allow_negative_numbers = true)]
    pub threshold: i32,

    /// Largest reading the sensor produces
    #[arg(default_value_t = DEFAULT_MAX_READING, allow_negative_numbers = true)]
    pub max_reading: i32,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Sensornet actuator: executes commands from the controller
#[derive(Debug, Parser)]
#[command(
    name = "actuator",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help("actuator")
)]
pub struct ActuatorCli {
    /// Display name
    pub name: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Sensornet cloud: shows relayed events and sends device queries
#[derive(Debug, Parser)]
#[command(
    name = "cloud",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help("cloud")
)]
pub struct CloudCli {
    /// Display name
    pub name: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

fn after_help(component: &str) -> String {
    format!("Logs are written to: {}", get_log_path(component).display())
}

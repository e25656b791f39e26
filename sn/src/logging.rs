//! Log file setup shared by every binary

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tracing::{Level, info};

/// Directory holding one log file per component
pub fn get_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensornet")
        .join("logs")
}

/// Log file of `component`
pub fn get_log_path(component: &str) -> PathBuf {
    get_log_dir().join(format!("{}.log", component))
}

/// Pick the level: command line first, then configuration, then INFO
pub fn resolve_level(cli_level: Option<&str>, config_level: Option<&str>) -> Result<Level> {
    match cli_level.or(config_level) {
        Some(level) => level
            .parse::<Level>()
            .map_err(|_| eyre::eyre!("Invalid log level: {}", level)),
        None => Ok(Level::INFO),
    }
}

/// Open `path` for appending, creating it if needed
fn open_log_file(path: &Path) -> Result<fs::File> {
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(format!("Failed to open log file {}", path.display()))
}

/// Send tracing output for `component` to its log file
///
/// Returns the path of the log file.
pub fn setup(component: &str, cli_level: Option<&str>, config_level: Option<&str>) -> Result<PathBuf> {
    let level = resolve_level(cli_level, config_level)?;
    fs::create_dir_all(get_log_dir()).context("Failed to create log directory")?;

    // Several processes of one component share the file, so append
    let log_path = get_log_path(component);
    let log_file = open_log_file(&log_path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install log subscriber: {}", e))?;

    info!(component, %level, "Logging initialized");
    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_is_info() {
        assert_eq!(resolve_level(None, None).unwrap(), Level::INFO);
    }

    #[test]
    fn test_cli_level_wins() {
        assert_eq!(resolve_level(Some("trace"), Some("warn")).unwrap(), Level::TRACE);
    }

    #[test]
    fn test_config_level_used_without_cli() {
        assert_eq!(resolve_level(None, Some("DEBUG")).unwrap(), Level::DEBUG);
    }

    #[test]
    fn test_invalid_level() {
        assert!(resolve_level(Some("chatty"), None).is_err());
    }

    #[test]
    fn test_log_file_is_appended() {
        use std::io::Write;

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("sensor.log");

        let mut first = open_log_file(&path).unwrap();
        writeln!(first, "first sensor").unwrap();
        let mut second = open_log_file(&path).unwrap();
        writeln!(second, "second sensor").unwrap();
        writeln!(first, "first again").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first sensor\nsecond sensor\nfirst again\n");
    }

    #[test]
    fn test_log_dir_is_namespaced() {
        assert!(get_log_dir().ends_with("sensornet/logs"));
    }
}

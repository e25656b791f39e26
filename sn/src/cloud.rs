//! The external peer
//!
//! Serves the peer socket, accepts the controller's relay bridge, shows every record it
//! relays, and turns operator input lines into peer requests.
//!
//! Operator lines have the form `<sensor|actuator> <pid> [command...]`; the command
//! defaults to `status`.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::messages::{MAX_DATA_LENGTH, truncate_bounded};
use crate::channel::wire::write_frame;
use crate::channel::{DeviceKind, Identity, cleanup_socket};
use crate::relay::{PeerRecord, PeerRequest};
use crate::shutdown::ShutdownFlag;

/// Command sent when an operator line names none
pub const DEFAULT_COMMAND: &str = "status";

/// Errors parsing an operator line
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestParseError {
    #[error("Expected: <sensor|actuator> <pid> [command...]")]
    MissingIdentity,

    #[error("{0}")]
    InvalidKind(String),

    #[error("Invalid PID: {0}")]
    InvalidIdentity(String),
}

/// Parse one operator line; blank lines yield `None`
///
/// Commands longer than the channel's data bound are truncated.
pub fn parse_request(line: &str) -> Result<Option<PeerRequest>, RequestParseError> {
    let mut words = line.split_whitespace();
    let Some(kind) = words.next() else {
        return Ok(None);
    };
    let kind: DeviceKind = kind.parse().map_err(RequestParseError::InvalidKind)?;

    let identity = words.next().ok_or(RequestParseError::MissingIdentity)?;
    let identity = identity
        .parse::<u32>()
        .map(Identity)
        .map_err(|_| RequestParseError::InvalidIdentity(identity.to_string()))?;

    let mut command = words.collect::<Vec<_>>().join(" ");
    if command.is_empty() {
        command = DEFAULT_COMMAND.to_string();
    }
    truncate_bounded(&mut command, MAX_DATA_LENGTH);

    Ok(Some(PeerRequest { kind, identity, command }))
}

/// What happened during a session, reported to the observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudEvent {
    Record(PeerRecord),
    RequestSent(PeerRequest),
    InputRejected { line: String, error: RequestParseError },
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The controller sent its terminal `Stop` record
    ControllerStopped,

    /// The controller closed the stream without `Stop`
    ControllerHungUp,

    /// Local shutdown was requested
    Interrupted,
}

/// Listening side of the peer socket
#[derive(Debug)]
pub struct CloudServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl CloudServer {
    /// Bind the peer socket, replacing a stale one
    pub fn bind_at(socket_path: &Path) -> Result<Self> {
        debug!(?socket_path, "CloudServer::bind_at: called");

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
        }
        if socket_path.exists() {
            debug!(?socket_path, "CloudServer::bind_at: removing stale socket");
            std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("Failed to bind peer socket")?;
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Wait for the controller to connect; `None` if shutdown came first
    pub async fn accept(&self, shutdown: &ShutdownFlag) -> Result<Option<UnixStream>> {
        info!(socket_path = ?self.socket_path, "Waiting for controller");
        tokio::select! {
            accepted = self.listener.accept() => {
                let (stream, _addr) = accepted.context("Failed to accept controller connection")?;
                info!("Controller connected");
                Ok(Some(stream))
            }
            _ = shutdown.triggered() => Ok(None),
        }
    }
}

impl Drop for CloudServer {
    fn drop(&mut self) {
        cleanup_socket(&self.socket_path);
    }
}

/// Relay records from the controller and operator requests to it until either side stops
pub async fn run_session<R, W>(
    controller_in: R,
    mut controller_out: W,
    mut input: mpsc::Receiver<String>,
    shutdown: &ShutdownFlag,
    mut observe: impl FnMut(&CloudEvent),
) -> Result<SessionEnd>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut records = controller_in.lines();
    let mut input_open = true;

    let end = loop {
        tokio::select! {
            line = records.next_line() => {
                let Some(line) = line.context("Failed to read from controller")? else {
                    warn!("Controller closed the connection");
                    break SessionEnd::ControllerHungUp;
                };
                match serde_json::from_str::<PeerRecord>(&line) {
                    Ok(PeerRecord::Stop) => {
                        observe(&CloudEvent::Record(PeerRecord::Stop));
                        info!("Controller stopped");
                        break SessionEnd::ControllerStopped;
                    }
                    Ok(record) => {
                        debug!(?record, "run_session: record");
                        observe(&CloudEvent::Record(record));
                    }
                    Err(e) => warn!(error = %e, %line, "Malformed controller record skipped"),
                }
            }
            line = input.recv(), if input_open => {
                let Some(line) = line else {
                    debug!("run_session: operator input closed");
                    input_open = false;
                    continue;
                };
                match parse_request(&line) {
                    Ok(Some(request)) => {
                        write_frame(&mut controller_out, &request)
                            .await
                            .context("Failed to send request to controller")?;
                        info!(?request, "Request sent");
                        observe(&CloudEvent::RequestSent(request));
                    }
                    Ok(None) => {}
                    Err(error) => observe(&CloudEvent::InputRejected { line, error }),
                }
            }
            _ = shutdown.triggered() => break SessionEnd::Interrupted,
        }
    };

    // Best effort; the controller may already be gone
    if let Err(e) = controller_out.shutdown().await {
        debug!(error = %e, "run_session: shutdown of outbound stream failed");
    }
    Ok(end)
}

/// Forward stdin lines into a channel from a dedicated thread
///
/// The thread blocks on stdin and ends with the process.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        use std::io::BufRead;
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, BufReader, duplex};

    #[test]
    fn test_parse_request_defaults_command() {
        let request = parse_request("sensor 42").unwrap().unwrap();
        assert_eq!(request.kind, DeviceKind::Sensor);
        assert_eq!(request.identity, Identity(42));
        assert_eq!(request.command, DEFAULT_COMMAND);
    }

    #[test]
    fn test_parse_request_joins_command_words() {
        let request = parse_request("  actuator 7 turn   off ").unwrap().unwrap();
        assert_eq!(request.kind, DeviceKind::Actuator);
        assert_eq!(request.command, "turn off");
    }

    #[test]
    fn test_parse_request_blank_line() {
        assert_eq!(parse_request("   "), Ok(None));
    }

    #[test]
    fn test_parse_request_errors() {
        assert!(matches!(parse_request("pump 1"), Err(RequestParseError::InvalidKind(_))));
        assert_eq!(parse_request("sensor"), Err(RequestParseError::MissingIdentity));
        assert_eq!(
            parse_request("sensor abc"),
            Err(RequestParseError::InvalidIdentity("abc".to_string()))
        );
    }

    #[tokio::test]
    async fn test_session_forwards_requests_and_stops() {
        let (mut controller_side, cloud_in) = duplex(4096);
        let (cloud_out, mut controller_reader) = duplex(4096);
        let (tx, rx) = mpsc::channel(4);
        let shutdown = ShutdownFlag::new();

        let session = tokio::spawn(async move {
            let mut events = Vec::new();
            let end = run_session(BufReader::new(cloud_in), cloud_out, rx, &shutdown, |event| {
                events.push(event.clone())
            })
            .await;
            (end, events)
        });

        tx.send("sensor 10".to_string()).await.unwrap();
        tx.send("bogus".to_string()).await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(5), controller_reader.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let request: PeerRequest = serde_json::from_slice(buf[..n].trim_ascii()).unwrap();
        assert_eq!(request.identity, Identity(10));

        controller_side
            .write_all(b"{\"type\":\"Error\",\"message\":\"error: nope\"}\n{\"type\":\"Stop\"}\n")
            .await
            .unwrap();

        let (end, events) = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.unwrap(), SessionEnd::ControllerStopped);
        assert!(events.iter().any(|e| matches!(e, CloudEvent::InputRejected { .. })));
        assert!(events.contains(&CloudEvent::Record(PeerRecord::Error {
            message: "error: nope".to_string()
        })));
        assert_eq!(events.last(), Some(&CloudEvent::Record(PeerRecord::Stop)));
    }

    #[test]
    fn test_parse_request_truncates_long_command() {
        let line = format!("sensor 10 {}", "x".repeat(5000));
        let request = parse_request(&line).unwrap().unwrap();
        assert_eq!(request.command.len(), MAX_DATA_LENGTH);
        assert!(request.command.chars().all(|c| c == 'x'));
    }

    #[tokio::test]
    async fn test_session_survives_long_command_line() {
        let (mut controller_side, cloud_in) = duplex(8192);
        let (cloud_out, controller_reader) = duplex(8192);
        let (tx, rx) = mpsc::channel(4);
        let shutdown = ShutdownFlag::new();

        let session = tokio::spawn(async move {
            run_session(BufReader::new(cloud_in), cloud_out, rx, &shutdown, |_| {}).await
        });

        tx.send(format!("sensor 10 {}", "x".repeat(5000))).await.unwrap();

        let mut lines = BufReader::new(controller_reader).lines();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("request should arrive")
            .unwrap()
            .unwrap();
        let request: PeerRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(request.identity, Identity(10));
        assert_eq!(request.command.len(), MAX_DATA_LENGTH);

        controller_side.write_all(b"{\"type\":\"Stop\"}\n").await.unwrap();
        let end = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.unwrap(), SessionEnd::ControllerStopped);
    }

    #[tokio::test]
    async fn test_session_ends_on_hangup() {
        let (controller_side, cloud_in) = duplex(1024);
        let (cloud_out, _controller_reader) = duplex(1024);
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = ShutdownFlag::new();

        drop(controller_side);
        let end = run_session(BufReader::new(cloud_in), cloud_out, rx, &shutdown, |_| {})
            .await
            .unwrap();
        assert_eq!(end, SessionEnd::ControllerHungUp);
    }

    #[tokio::test]
    async fn test_server_removes_socket_on_drop() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("cloud.sock");
        let server = CloudServer::bind_at(&path).unwrap();
        assert!(path.exists());
        drop(server);
        assert!(!path.exists());
    }
}

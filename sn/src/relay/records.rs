//! Records exchanged with the external peer

use serde::{Deserialize, Serialize};

use crate::channel::{DeviceKind, Identity, Message, RelayEvent};

/// Records from the controller to the peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PeerRecord {
    /// A device event
    Event { event: RelayEvent },

    /// A query could not be answered
    Error { message: String },

    /// The controller is shutting down; no more records follow
    Stop,
}

/// Query from the peer about one device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerRequest {
    pub kind: DeviceKind,
    pub identity: Identity,
    pub command: String,
}

impl PeerRequest {
    /// The channel message the relay bridge sends for this request
    pub fn into_message(self) -> Message {
        Message::PeerQuery {
            target: self.identity,
            kind: self.kind,
            command: self.command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_request_deserialize() {
        let json = r#"{"kind":"actuator","identity":314,"command":"status"}"#;
        let request: PeerRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            PeerRequest {
                kind: DeviceKind::Actuator,
                identity: Identity(314),
                command: "status".to_string(),
            }
        );
    }

    #[test]
    fn test_peer_request_into_message() {
        let request = PeerRequest {
            kind: DeviceKind::Sensor,
            identity: Identity(8),
            command: "read".to_string(),
        };
        assert_eq!(
            request.into_message(),
            Message::PeerQuery {
                target: Identity(8),
                kind: DeviceKind::Sensor,
                command: "read".to_string(),
            }
        );
    }

    #[test]
    fn test_error_record_serialize() {
        let record = PeerRecord::Error {
            message: "error: Device with PID=9 does not exist".to_string(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"type":"Error","message":"error: Device with PID=9 does not exist"}"#
        );
    }

    #[test]
    fn test_stop_record_serialize() {
        let json = serde_json::to_string(&PeerRecord::Stop).unwrap();
        assert_eq!(json, r#"{"type":"Stop"}"#);
    }
}

//! JSON frames exchanged with control-panel clients.
//!
//! Requests and responses are single-line JSON objects discriminated by a
//! `type` field. Core data types (configs, results, snapshots, events)
//! are flattened into the frames unchanged, so the wire shape is exactly
//! what `control_plane` serializes.

use control_plane::{BackendConfig, CommandResult, ProxyError, ProxyEvent, StatusSnapshot};
use serde::{Deserialize, Serialize};

/// A request frame from a control-panel client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Registers a backend under `name`. Connection settings ride in the
    /// same object (`host`, `port`, `password`, tunables).
    RegisterServer {
        name: String,
        #[serde(flatten)]
        config: BackendConfig,
    },
    /// Removes a backend, cancelling anything queued or in flight for it.
    DeregisterServer { name: String },
    /// Executes one command. `correlation_id` is generated when absent.
    RunCommand {
        name: String,
        command: String,
        #[serde(default)]
        correlation_id: Option<String>,
    },
    /// Latest status snapshot for one backend.
    GetStatus { name: String },
    /// Latest snapshots for every registered backend.
    ListServers,
    /// Attaches this connection to the broadcast hub.
    Subscribe,
    /// Application-level liveness check.
    Ping,
}

/// A response or push frame to a control-panel client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// `register_server` succeeded.
    Registered { name: String },
    /// `deregister_server` succeeded.
    Deregistered { name: String },
    /// Outcome of a `run_command`.
    CommandResult {
        #[serde(flatten)]
        result: CommandResult,
    },
    /// Answer to `get_status`.
    ServerStatus {
        #[serde(flatten)]
        snapshot: StatusSnapshot,
    },
    /// Answer to `list_servers`.
    ServerList { servers: Vec<StatusSnapshot> },
    /// The connection is now attached to the hub.
    Subscribed,
    /// A hub event (status snapshot or command result).
    Event {
        #[serde(flatten)]
        event: ProxyEvent,
    },
    /// Events were dropped for this subscriber; resynchronize via
    /// `get_status` / `list_servers`.
    MissedEvents,
    /// Answer to `ping`.
    Pong { version: String },
    /// The request could not be served.
    Error { code: String, message: String },
}

impl ServerFrame {
    /// Error frame with a machine-readable code.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<ProxyError> for ServerFrame {
    fn from(error: ProxyError) -> Self {
        let code = match &error {
            ProxyError::DuplicateBackend(_) => "duplicate_server",
            ProxyError::UnknownBackend(_) => "unknown_server",
            ProxyError::BackendRemoved(_) => "server_removed",
        };
        ServerFrame::error(code, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_frame_parses_with_defaulted_tunables() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type": "register_server", "name": "lobby",
                "host": "mc.example.com", "password": "secret"}"#,
        )
        .expect("valid frame");

        let ClientFrame::RegisterServer { name, config } = frame else {
            panic!("expected register_server");
        };
        assert_eq!(name, "lobby");
        assert_eq!(config.host, "mc.example.com");
        assert_eq!(config.port, control_plane::types::DEFAULT_BACKEND_PORT);
    }

    #[test]
    fn run_command_without_correlation_id() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type": "run_command", "name": "lobby", "command": "say hi"}"#,
        )
        .expect("valid frame");

        assert!(matches!(
            frame,
            ClientFrame::RunCommand { correlation_id: None, .. }
        ));
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type": "reboot_everything"}"#).is_err());
    }

    #[test]
    fn proxy_errors_map_to_wire_codes() {
        let frame = ServerFrame::from(ProxyError::UnknownBackend("lobby".to_string()));
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "unknown_server");
    }

    #[test]
    fn event_frame_flattens_the_hub_event() {
        let frame = ServerFrame::Event {
            event: ProxyEvent::Status(StatusSnapshot::initial("lobby")),
        };
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "status");
        assert_eq!(json["backend"], "lobby");
    }
}

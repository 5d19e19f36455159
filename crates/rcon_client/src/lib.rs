//! # RCON Wire Protocol Client
//!
//! Implements the remote-console protocol spoken by game-server backends:
//! an authenticated, request/response command protocol framed as
//! length-prefixed little-endian packets over TCP.
//!
//! The crate exposes two layers:
//!
//! * **Traits** ([`RconConnector`] / [`RconTransport`]) - the narrow
//!   interface the control plane calls through (`connect`, `authenticate`,
//!   `send`, `close`). The control plane never touches packet bytes.
//! * **TCP implementation** ([`TcpConnector`] / [`TcpTransport`]) - the
//!   production wiring over a tokio `TcpStream`, one session per backend.
//!
//! ## Packet Layout
//!
//! ```text
//! [length: i32 LE] [request id: i32 LE] [type: i32 LE] [body...] [0x00] [0x00]
//! ```
//!
//! `length` counts everything after itself. Authentication uses packet type
//! 3 and is answered with type 2; a response id of -1 signals refused
//! credentials. Commands use type 2 and are answered with type 0.

pub use packet::{Packet, PacketType, MAX_INBOUND_PAYLOAD, MAX_OUTBOUND_PAYLOAD};
pub use tcp::{TcpConnector, TcpTransport};

pub mod packet;
pub mod tcp;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the remote-console protocol layer.
///
/// Every variant is recoverable from the control plane's point of view:
/// the caller converts them into backoff state and failure results rather
/// than letting them propagate as faults.
#[derive(Debug, Error)]
pub enum RconError {
    /// The TCP connection could not be established (refused, unreachable,
    /// or the connect attempt timed out).
    #[error("connect failed: {0}")]
    Connect(String),

    /// The backend rejected the authentication secret.
    #[error("authentication rejected by backend")]
    Auth,

    /// No response arrived within the caller-supplied timeout.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The response could not be parsed as a valid protocol packet.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The transport is not connected (never connected, closed, or torn
    /// down after an earlier failure).
    #[error("link is closed")]
    Closed,
}

impl RconError {
    /// Short machine-readable tag for this error kind, used when a failure
    /// is reported through an event stream instead of a `Result`.
    pub fn kind(&self) -> &'static str {
        match self {
            RconError::Connect(_) => "connect",
            RconError::Auth => "auth",
            RconError::Timeout(_) => "timeout",
            RconError::Protocol(_) => "protocol",
            RconError::Closed => "closed",
        }
    }
}

/// Factory for remote-console transports.
///
/// The control plane owns one connector and calls it whenever a backend
/// link needs a fresh session (initial connect or reconnect after a
/// failure). Implementations must be cheap to share across tasks.
#[async_trait]
pub trait RconConnector: Send + Sync + 'static {
    /// The transport type this connector produces.
    type Transport: RconTransport;

    /// Establishes a new session to `host:port`.
    ///
    /// Only the TCP-level connect happens here; authentication is a
    /// separate step so the caller can distinguish `Connect` failures
    /// from `Auth` failures.
    async fn connect(&self, host: &str, port: u16) -> Result<Self::Transport, RconError>;
}

/// One live remote-console session.
///
/// A transport executes exactly one request/response exchange at a time;
/// serialization across callers is the control plane's job, not the
/// transport's.
#[async_trait]
pub trait RconTransport: Send + 'static {
    /// Performs the authentication handshake with the given secret.
    async fn authenticate(&mut self, secret: &str, timeout: Duration) -> Result<(), RconError>;

    /// Sends one command and waits for the response payload.
    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, RconError>;

    /// Releases the underlying connection. Idempotent.
    async fn close(&mut self);
}

//! Gateway-level errors.
//!
//! Everything here concerns one client connection or the listener; a
//! failing connection is logged and dropped without touching the rest of
//! the process.

use thiserror::Error;

/// Errors raised by the WebSocket surface.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// The WebSocket handshake with a client failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}

//! # Gateway - WebSocket surface for the control plane
//!
//! Accepts control-panel clients over WebSocket, decodes single-line JSON
//! request frames, calls into the [`control_plane`] session layer, and
//! pushes broadcast-hub events to subscribed connections.
//!
//! The gateway holds no state of its own beyond the live connections: all
//! registration, session, and status state lives in the control plane, so
//! a dropped connection loses nothing but its own subscription.

pub use error::GatewayError;
pub use messages::{ClientFrame, ServerFrame};
pub use server::Gateway;

pub mod error;
pub mod messages;
pub mod server;

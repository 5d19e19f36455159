//! # Control Plane - Session Proxy & Status Broadcast Engine
//!
//! The core of the proxy process: owns the connections to every managed
//! game-server backend, serializes command execution per backend, tolerates
//! backend unavailability, and fans status updates out to any number of
//! live observers without ever blocking a producer on a slow consumer.
//!
//! ## Architecture Overview
//!
//! * **Backend Link** ([`link::BackendLink`]) - one network session to one
//!   backend; handshake, one command at a time, health state.
//! * **Session Manager** ([`SessionManager`]) - the registry of links keyed
//!   by backend identity; per-backend FIFO serialization, reconnect with
//!   exponential backoff, the uniform execute/query API.
//! * **Status Poller** ([`poller`]) - an independent timer task per backend
//!   probing link health and publishing snapshots.
//! * **Broadcast Hub** ([`BroadcastHub`]) - bounded-queue fan-out of status
//!   and command-result events to dynamically admitted subscribers.
//!
//! ## Message Flow
//!
//! 1. A control-panel command arrives as `execute(identity, command, id)`
//! 2. The Session Manager acquires the backend's serialization slot (FIFO)
//! 3. The Backend Link runs exactly one protocol exchange
//! 4. The result returns to the caller and is published to the hub
//! 5. Pollers independently publish status snapshots on their own cadence
//!
//! ## Failure Containment
//!
//! Link-layer errors (connect, auth, timeout, protocol) never escape as
//! faults: they become backoff state plus a `Failure` result. Caller-input
//! errors ([`ProxyError`]) surface synchronously. A slow event subscriber
//! only ever loses its own events. Nothing in this crate can take the
//! process down; the worst outcome is a backend reported `Degraded` or a
//! subscriber evicted.

pub use error::ProxyError;
pub use hub::{BroadcastHub, HubSettings, SubscriberHandle};
pub use session::SessionManager;
pub use types::{
    now_millis, parse_player_list, BackendConfig, BackoffPolicy, CommandOutcome, CommandRequest,
    CommandResult, LinkState, ProxyEvent, StatusSnapshot,
};

pub mod error;
pub mod hub;
pub mod link;
pub mod poller;
pub mod session;
pub mod types;

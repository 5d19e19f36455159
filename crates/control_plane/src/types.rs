//! Shared data model: backend configuration, command results, status
//! snapshots, and the events the Broadcast Hub fans out.
//!
//! Everything here is serde-serializable because the gateway republishes
//! these types verbatim as JSON frames to control-panel clients.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default remote-console port for game-server backends.
pub const DEFAULT_BACKEND_PORT: u16 = 25575;

fn default_port() -> u16 {
    DEFAULT_BACKEND_PORT
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_probe_command() -> String {
    "list".to_string()
}

fn default_degrade_threshold() -> u32 {
    3
}

/// Configuration for one registered backend.
///
/// Supplied at registration and owned by the Session Manager from then on.
/// Replacing a backend's configuration is deregister + register; a config
/// is never mutated while a command is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend hostname or IP address.
    pub host: String,

    /// Remote-console port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Remote-console authentication secret.
    pub password: String,

    /// Per-command timeout in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Status poll cadence for this backend, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Command used as the health probe. Defaults to `list` because the
    /// protocol has no dedicated ping and the player list doubles as a
    /// liveness signal.
    #[serde(default = "default_probe_command")]
    pub probe_command: String,

    /// Reconnect backoff schedule after link failures.
    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Consecutive probe failures before the backend is reported
    /// `Degraded` instead of its raw link state.
    #[serde(default = "default_degrade_threshold")]
    pub degrade_threshold: u32,
}

impl BackendConfig {
    /// Creates a config for `host:port` with all tunables at defaults.
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            command_timeout_ms: default_command_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            probe_command: default_probe_command(),
            backoff: BackoffPolicy::default(),
            degrade_threshold: default_degrade_threshold(),
        }
    }

    /// Per-command timeout as a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Poll cadence as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Exponential backoff schedule applied after link failures.
///
/// The delay after the n-th consecutive failure is `base × 2^(n−1)`,
/// capped at `cap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure, in milliseconds.
    pub base_ms: u64,
    /// Upper bound on the delay, in milliseconds.
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            cap_ms: 30_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay to apply after `consecutive_failures` failures (≥ 1).
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        let millis = self
            .base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.cap_ms);
        Duration::from_millis(millis)
    }
}

/// Connection state of one backend link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No connection; a connect will be attempted lazily.
    Disconnected,
    /// A connect/handshake is in progress.
    Connecting,
    /// Authenticated and able to execute commands.
    Ready,
    /// Recent failures (for example a command timeout) without a full
    /// teardown; the next command attempts a reconnect.
    Degraded,
    /// Explicitly closed; the link will not be used again.
    Closed,
}

/// One administrative command addressed to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Target backend identity.
    pub backend: String,
    /// Command text forwarded verbatim over the remote console.
    pub command: String,
    /// Caller-supplied token linking this request to its result.
    pub correlation_id: String,
}

/// Outcome of one command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The backend answered; `payload` is its response text.
    Success { payload: String },
    /// The command could not be executed. `kind` is the short error tag
    /// (`connect`, `auth`, `protocol`, `closed`, `backoff`).
    Failure { kind: String, message: String },
    /// No response arrived within the configured timeout.
    Timeout,
}

/// Result of one command, delivered to the caller and to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Echo of the caller's correlation id.
    pub correlation_id: String,
    /// Backend the command was addressed to.
    pub backend: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: CommandOutcome,
    /// Completion time, Unix milliseconds.
    pub timestamp_ms: u64,
}

/// Latest-wins health snapshot for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Backend identity.
    pub backend: String,
    /// Reported state. `Degraded` once the consecutive-failure count
    /// reaches the configured threshold, the raw link state otherwise.
    pub state: LinkState,
    /// Time of the last successful command or probe, Unix milliseconds.
    pub last_success_ms: Option<u64>,
    /// Round-trip latency of the last successful probe, milliseconds.
    pub probe_latency_ms: Option<u64>,
    /// Consecutive command/probe failures since the last success.
    pub consecutive_failures: u32,
    /// Player count parsed from the last `list` probe, if available.
    pub players_online: Option<u32>,
}

impl StatusSnapshot {
    /// Initial snapshot for a freshly registered backend.
    pub fn initial(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            state: LinkState::Disconnected,
            last_success_ms: None,
            probe_latency_ms: None,
            consecutive_failures: 0,
            players_online: None,
        }
    }
}

/// Event fanned out to every hub subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProxyEvent {
    /// A fresh status snapshot for one backend.
    Status(StatusSnapshot),
    /// A command finished (successfully or not).
    Command(CommandResult),
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Parses a backend's `list` response into player names.
///
/// Backends answer with
/// `"There are 2 of a max of 20 players online: alice, bob"`. Returns
/// `None` when the response does not carry the marker, `Some(players)`
/// otherwise (possibly empty).
pub fn parse_player_list(response: &str) -> Option<Vec<String>> {
    let (_, names) = response.split_once("players online:")?;
    Some(
        names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

//! Session manager: the registry of backend links and the serialized
//! execute path.
//!
//! Owns every [`BackendLink`], keyed by backend identity. The central
//! correctness property lives here: at most one command executes against
//! a given backend at a time, and concurrent callers are served in FIFO
//! order. The serialization slot is a per-backend `tokio::sync::Mutex` -
//! a fair ticket queue whose scoped guard guarantees release on every
//! exit path (success, timeout, or cancellation).

use crate::error::ProxyError;
use crate::hub::BroadcastHub;
use crate::link::BackendLink;
use crate::poller;
use crate::types::{
    now_millis, parse_player_list, BackendConfig, CommandOutcome, CommandResult, LinkState,
    ProxyEvent, StatusSnapshot,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rcon_client::{RconConnector, RconError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome of racing a link operation against the removal signal.
enum Raced<T> {
    Done(T),
    Removed,
}

/// Everything the session manager and the poller share for one backend.
///
/// The link itself sits behind the serialization slot; the snapshot and
/// the backoff gate are tiny synchronous critical sections updated under
/// that slot.
pub(crate) struct BackendEntry<C: RconConnector> {
    pub(crate) identity: String,
    pub(crate) config: BackendConfig,
    /// The per-backend serialization slot.
    pub(crate) link: tokio::sync::Mutex<BackendLink<C>>,
    /// Latest-wins health snapshot.
    status: Mutex<StatusSnapshot>,
    /// Earliest instant the link may attempt to (re)connect.
    next_attempt_at: Mutex<Option<Instant>>,
    /// Flips to `true` exactly once, on deregistration.
    pub(crate) removed: watch::Sender<bool>,
}

impl<C: RconConnector> BackendEntry<C> {
    fn new(identity: &str, config: BackendConfig, connector: Arc<C>) -> Self {
        let (removed, _) = watch::channel(false);
        Self {
            identity: identity.to_string(),
            link: tokio::sync::Mutex::new(BackendLink::new(identity, config.clone(), connector)),
            status: Mutex::new(StatusSnapshot::initial(identity)),
            next_attempt_at: Mutex::new(None),
            removed,
            config,
        }
    }

    pub(crate) fn is_removed(&self) -> bool {
        *self.removed.subscribe().borrow()
    }

    /// Resolves once the backend has been deregistered.
    pub(crate) async fn wait_removed(&self) {
        let mut rx = self.removed.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            // A dropped sender can only mean the entry is being torn down.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        self.status.lock().expect("status lock poisoned").clone()
    }

    /// Remaining backoff window, clearing the gate once it has expired.
    pub(crate) fn backoff_remaining(&self) -> Option<Duration> {
        let mut gate = self.next_attempt_at.lock().expect("backoff gate poisoned");
        match *gate {
            Some(at) => {
                let now = Instant::now();
                if at <= now {
                    *gate = None;
                    None
                } else {
                    Some(at - now)
                }
            }
            None => None,
        }
    }

    /// Records a successful exchange: failure count resets, the backoff
    /// gate clears, and the snapshot reflects the (now `Ready`) link.
    pub(crate) fn record_success(
        &self,
        state: LinkState,
        probe_latency: Option<Duration>,
        players_online: Option<u32>,
    ) {
        *self.next_attempt_at.lock().expect("backoff gate poisoned") = None;
        let mut status = self.status.lock().expect("status lock poisoned");
        status.state = state;
        status.consecutive_failures = 0;
        status.last_success_ms = Some(now_millis());
        if let Some(latency) = probe_latency {
            status.probe_latency_ms = Some(latency.as_millis() as u64);
        }
        if players_online.is_some() {
            status.players_online = players_online;
        }
    }

    /// Records a failed exchange: the failure count grows, the backoff
    /// gate advances on the exponential schedule, and once the count
    /// reaches the degrade threshold the snapshot reports `Degraded`
    /// regardless of the raw link state (avoids flapping on single blips).
    pub(crate) fn record_failure(&self, link_state: LinkState) -> u32 {
        let mut status = self.status.lock().expect("status lock poisoned");
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        let failures = status.consecutive_failures;
        status.state = if failures >= self.config.degrade_threshold {
            LinkState::Degraded
        } else {
            link_state
        };
        drop(status);

        *self.next_attempt_at.lock().expect("backoff gate poisoned") =
            Some(Instant::now() + self.config.backoff.delay(failures));
        failures
    }
}

/// The uniform execute/query API over the set of registered backends.
///
/// Generic over the wire connector so tests can script the protocol layer;
/// production wiring uses `rcon_client::TcpConnector`.
pub struct SessionManager<C: RconConnector> {
    connector: Arc<C>,
    hub: Arc<BroadcastHub>,
    backends: DashMap<String, Arc<BackendEntry<C>>>,
}

impl<C: RconConnector> SessionManager<C> {
    /// Creates a manager with no registered backends.
    pub fn new(connector: C, hub: Arc<BroadcastHub>) -> Self {
        Self {
            connector: Arc::new(connector),
            hub,
            backends: DashMap::new(),
        }
    }

    /// The hub this manager publishes into.
    pub fn hub(&self) -> Arc<BroadcastHub> {
        self.hub.clone()
    }

    /// Registers a backend and starts its status poller.
    ///
    /// Does not connect eagerly: the connection happens lazily on the
    /// first command, or proactively by the poller on its first cycle.
    pub fn register(&self, identity: &str, config: BackendConfig) -> Result<(), ProxyError> {
        match self.backends.entry(identity.to_string()) {
            Entry::Occupied(_) => Err(ProxyError::DuplicateBackend(identity.to_string())),
            Entry::Vacant(slot) => {
                let entry = Arc::new(BackendEntry::new(identity, config, self.connector.clone()));
                slot.insert(entry.clone());
                poller::spawn(entry, self.hub.clone());
                info!("🆕 Registered backend '{}'", identity);
                Ok(())
            }
        }
    }

    /// Deregisters a backend: any queued or in-flight command for it is
    /// cancelled with [`ProxyError::BackendRemoved`], its poller stops,
    /// and the link is closed.
    pub async fn deregister(&self, identity: &str) -> Result<(), ProxyError> {
        let (_, entry) = self
            .backends
            .remove(identity)
            .ok_or_else(|| ProxyError::UnknownBackend(identity.to_string()))?;

        // Waiters and the poller observe this signal and exit promptly,
        // so acquiring the slot below is quick even with a command in
        // flight.
        let _ = entry.removed.send(true);

        let mut link = entry.link.lock().await;
        link.close().await;
        info!("🗑️ Deregistered backend '{}'", identity);
        Ok(())
    }

    /// Executes one command against a backend.
    ///
    /// Callers queue FIFO on the backend's serialization slot. If the
    /// link is not `Ready`, one connect is attempted first; link failures
    /// are absorbed into backoff state and returned as a `Failure` (or
    /// `Timeout`) outcome - promptly, never waiting out the backoff
    /// window. Every result is also published to the hub, which cannot
    /// block or fail the caller.
    pub async fn execute(
        &self,
        identity: &str,
        command: &str,
        correlation_id: &str,
    ) -> Result<CommandResult, ProxyError> {
        let entry = self
            .backends
            .get(identity)
            .map(|e| e.value().clone())
            .ok_or_else(|| ProxyError::UnknownBackend(identity.to_string()))?;

        // Acquire the slot, racing the removal signal so deregistration
        // also cancels callers still waiting in the queue.
        let mut link = tokio::select! {
            guard = entry.link.lock() => guard,
            () = entry.wait_removed() => {
                return Err(ProxyError::BackendRemoved(identity.to_string()));
            }
        };
        if entry.is_removed() {
            return Err(ProxyError::BackendRemoved(identity.to_string()));
        }

        // Fail fast while the backoff gate is closed; the caller gets an
        // immediate failure, not a wait for the window to expire.
        if let Some(remaining) = entry.backoff_remaining() {
            let outcome = CommandOutcome::Failure {
                kind: "backoff".to_string(),
                message: format!(
                    "backend is backing off for another {}ms after repeated failures",
                    remaining.as_millis()
                ),
            };
            return Ok(self.finish(&entry, correlation_id, outcome));
        }

        if link.state() != LinkState::Ready {
            let raced = tokio::select! {
                result = link.connect() => Raced::Done(result),
                () = entry.wait_removed() => Raced::Removed,
            };
            match raced {
                Raced::Removed => {
                    link.close().await;
                    return Err(ProxyError::BackendRemoved(identity.to_string()));
                }
                Raced::Done(Err(e)) => {
                    entry.record_failure(link.state());
                    return Ok(self.finish(&entry, correlation_id, failure_outcome(e)));
                }
                Raced::Done(Ok(())) => {}
            }
        }

        let raced = tokio::select! {
            result = link.execute(command) => Raced::Done(result),
            () = entry.wait_removed() => Raced::Removed,
        };
        let outcome = match raced {
            Raced::Removed => {
                link.close().await;
                return Err(ProxyError::BackendRemoved(identity.to_string()));
            }
            Raced::Done(Ok(payload)) => {
                entry.record_success(link.state(), None, None);
                CommandOutcome::Success { payload }
            }
            Raced::Done(Err(e)) => {
                entry.record_failure(link.state());
                failure_outcome(e)
            }
        };

        drop(link);
        Ok(self.finish(&entry, correlation_id, outcome))
    }

    /// Latest status snapshot for a backend. Never touches the network.
    pub fn current_state(&self, identity: &str) -> Result<StatusSnapshot, ProxyError> {
        self.backends
            .get(identity)
            .map(|entry| entry.snapshot())
            .ok_or_else(|| ProxyError::UnknownBackend(identity.to_string()))
    }

    /// Latest snapshots for every registered backend, sorted by identity.
    pub fn list_servers(&self) -> Vec<StatusSnapshot> {
        let mut snapshots: Vec<StatusSnapshot> = self
            .backends
            .iter()
            .map(|entry| entry.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.backend.cmp(&b.backend));
        snapshots
    }

    /// Convenience query: runs `list` through the ordinary execute path
    /// and parses the player names out of the response. `None` when the
    /// command failed or the response was not a player list.
    pub async fn list_players(&self, identity: &str) -> Result<Option<Vec<String>>, ProxyError> {
        let correlation_id = Uuid::new_v4().to_string();
        let result = self.execute(identity, "list", &correlation_id).await?;
        Ok(match result.outcome {
            CommandOutcome::Success { payload } => parse_player_list(&payload),
            _ => None,
        })
    }

    /// Number of registered backends.
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Builds the result, publishes it to the hub, and hands it back.
    fn finish(
        &self,
        entry: &BackendEntry<C>,
        correlation_id: &str,
        outcome: CommandOutcome,
    ) -> CommandResult {
        let result = CommandResult {
            correlation_id: correlation_id.to_string(),
            backend: entry.identity.clone(),
            outcome,
            timestamp_ms: now_millis(),
        };
        self.hub.publish(&ProxyEvent::Command(result.clone()));
        debug!(
            "📨 Command {} on '{}' finished",
            result.correlation_id, result.backend
        );
        result
    }
}

/// Maps a link-layer error to its command outcome.
fn failure_outcome(error: RconError) -> CommandOutcome {
    match error {
        RconError::Timeout(_) => CommandOutcome::Timeout,
        other => CommandOutcome::Failure {
            kind: other.kind().to_string(),
            message: other.to_string(),
        },
    }
}

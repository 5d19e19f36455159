//! Status poller: one background task per backend, publishing health
//! snapshots to the Broadcast Hub on that backend's own cadence.
//!
//! The poller shares the backend's serialization slot with the command
//! path but only ever `try_lock`s it: a probe must never queue behind
//! (or delay) real commands. A busy slot means a command is in flight,
//! which is itself evidence of liveness, so skipping that cycle loses
//! nothing.

use crate::hub::BroadcastHub;
use crate::session::BackendEntry;
use crate::types::{LinkState, ProxyEvent};
use rcon_client::RconConnector;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Starts the poll loop for one backend. The task exits on its own once
/// the backend is deregistered.
pub(crate) fn spawn<C: RconConnector>(
    entry: Arc<BackendEntry<C>>,
    hub: Arc<BroadcastHub>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(
            "⏱️ Poller for '{}' started ({}ms cadence)",
            entry.identity, entry.config.poll_interval_ms
        );

        let mut ticker = tokio::time::interval(entry.config.poll_interval());
        // A slow probe must not cause a burst of catch-up probes.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; the first probe happens one full
        // period after registration.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = entry.wait_removed() => break,
            }

            if !poll_once(&entry, &hub).await {
                break;
            }
        }

        debug!("⏱️ Poller for '{}' stopped", entry.identity);
    })
}

/// Runs one poll cycle. Returns `false` once the backend has been
/// deregistered and no further snapshots may be published.
async fn poll_once<C: RconConnector>(entry: &BackendEntry<C>, hub: &BroadcastHub) -> bool {
    // Never queue behind a command; a held slot means the link is busy.
    let Ok(mut link) = entry.link.try_lock() else {
        trace!("⏱️ Poller for '{}' skipped a cycle (slot busy)", entry.identity);
        return true;
    };
    if entry.is_removed() {
        return false;
    }

    // While the backoff gate is closed the poller republishes the last
    // snapshot instead of hammering the backend with connect attempts.
    if entry.backoff_remaining().is_some() {
        drop(link);
        hub.publish(&ProxyEvent::Status(entry.snapshot()));
        return true;
    }

    if link.state() != LinkState::Ready {
        let connected = tokio::select! {
            result = link.connect() => result,
            () = entry.wait_removed() => return false,
        };
        if let Err(e) = connected {
            let failures = entry.record_failure(link.state());
            debug!(
                "⏱️ Probe connect to '{}' failed ({} consecutive): {}",
                entry.identity, failures, e
            );
            drop(link);
            hub.publish(&ProxyEvent::Status(entry.snapshot()));
            return true;
        }
    }

    let probed = tokio::select! {
        result = link.probe() => result,
        () = entry.wait_removed() => return false,
    };
    match probed {
        Ok((latency, payload)) => {
            let players_online = if entry.config.probe_command == "list" {
                crate::types::parse_player_list(&payload).map(|players| players.len() as u32)
            } else {
                None
            };
            entry.record_success(link.state(), Some(latency), players_online);
        }
        Err(e) => {
            let failures = entry.record_failure(link.state());
            debug!(
                "⏱️ Probe of '{}' failed ({} consecutive): {}",
                entry.identity, failures, e
            );
        }
    }

    drop(link);
    if entry.is_removed() {
        return false;
    }
    hub.publish(&ProxyEvent::Status(entry.snapshot()));
    true
}

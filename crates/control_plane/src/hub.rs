//! Broadcast hub: bounded-queue fan-out of proxy events to observers.
//!
//! Every subscriber gets its own bounded queue. Publishing is a
//! non-blocking `try_send` per subscriber: a full queue drops the event
//! for that subscriber only, marks it as having missed events (so it can
//! resynchronize from the latest snapshots), and a sustained run of full
//! publishes evicts it entirely. A slow control panel can never stall the
//! session manager or the pollers, and hub memory stays bounded by
//! `subscribers × queue capacity`.

use crate::types::ProxyEvent;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn default_queue_capacity() -> usize {
    64
}

fn default_eviction_threshold() -> u32 {
    8
}

/// Tunables for the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Bounded queue capacity per subscriber.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Consecutive publishes that found a subscriber's queue full before
    /// that subscriber is forcibly unsubscribed.
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: u32,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            eviction_threshold: default_eviction_threshold(),
        }
    }
}

struct SubscriberSlot {
    tx: mpsc::Sender<ProxyEvent>,
    consecutive_full: u32,
    missed: Arc<AtomicBool>,
}

/// Fan-out of [`ProxyEvent`]s to an open set of subscribers.
pub struct BroadcastHub {
    subscribers: DashMap<Uuid, SubscriberSlot>,
    settings: HubSettings,
}

impl BroadcastHub {
    /// Creates a hub with the given tunables.
    pub fn new(settings: HubSettings) -> Self {
        Self {
            subscribers: DashMap::new(),
            settings,
        }
    }

    /// Admits a new subscriber with an empty bounded queue.
    pub fn subscribe(&self) -> SubscriberHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity);
        let missed = Arc::new(AtomicBool::new(false));
        self.subscribers.insert(
            id,
            SubscriberSlot {
                tx,
                consecutive_full: 0,
                missed: missed.clone(),
            },
        );
        info!("📡 Subscriber {} joined ({} active)", id, self.subscribers.len());
        SubscriberHandle { id, rx, missed }
    }

    /// Removes a subscriber. Idempotent; events already queued for it are
    /// discarded with its channel.
    pub fn unsubscribe(&self, handle: &SubscriberHandle) {
        self.unsubscribe_id(handle.id);
    }

    /// Removes a subscriber by id. Idempotent.
    pub fn unsubscribe_id(&self, id: Uuid) {
        if self.subscribers.remove(&id).is_some() {
            info!("📡 Subscriber {} left ({} active)", id, self.subscribers.len());
        }
    }

    /// Delivers `event` to every current subscriber, best-effort.
    ///
    /// Never suspends and never reports failure to the caller: a full
    /// queue costs that one subscriber this one event, and a subscriber
    /// whose queue has been full for the configured run of publishes is
    /// evicted here.
    pub fn publish(&self, event: &ProxyEvent) {
        let mut evicted = Vec::new();

        for mut slot in self.subscribers.iter_mut() {
            let id = *slot.key();
            match slot.tx.try_send(event.clone()) {
                Ok(()) => {
                    slot.consecutive_full = 0;
                }
                Err(TrySendError::Full(_)) => {
                    slot.missed.store(true, Ordering::Relaxed);
                    slot.consecutive_full += 1;
                    if slot.consecutive_full >= self.settings.eviction_threshold {
                        evicted.push(id);
                    } else {
                        debug!(
                            "📪 Subscriber {} queue full, dropped event ({} consecutive)",
                            id, slot.consecutive_full
                        );
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    evicted.push(id);
                }
            }
        }

        for id in evicted {
            if self.subscribers.remove(&id).is_some() {
                warn!("🚮 Evicted slow subscriber {}", id);
            }
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// A subscriber's reading end.
///
/// Dropping the handle closes the queue; the hub notices on its next
/// publish and cleans up the registration, but explicit
/// [`BroadcastHub::unsubscribe`] releases it immediately.
pub struct SubscriberHandle {
    id: Uuid,
    rx: mpsc::Receiver<ProxyEvent>,
    missed: Arc<AtomicBool>,
}

impl SubscriberHandle {
    /// This subscriber's identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next event. Returns `None` once the subscription has
    /// been removed (unsubscribe or eviction) and the queue is drained.
    pub async fn recv(&mut self) -> Option<ProxyEvent> {
        self.rx.recv().await
    }

    /// Non-blocking read of the next queued event.
    pub fn try_recv(&mut self) -> Option<ProxyEvent> {
        self.rx.try_recv().ok()
    }

    /// Returns whether events were dropped for this subscriber since the
    /// last call, clearing the marker. A subscriber seeing `true` should
    /// resynchronize via the latest status snapshots.
    pub fn take_missed_events(&self) -> bool {
        self.missed.swap(false, Ordering::Relaxed)
    }
}

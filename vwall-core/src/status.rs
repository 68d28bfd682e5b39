//! Fleet-wide status view.
//!
//! Purely reactive: sessions publish [`StatusEvent`]s, the aggregator folds
//! them into per-display entries and fans them out to subscribers. It never
//! polls a display itself.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::endpoint::DisplayId;
use crate::message::DisplayValues;
use crate::state::LinkState;

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum StatusEvent {
    /// Link state or failure counter changed.
    Link {
        display: DisplayId,
        previous: LinkState,
        state: LinkState,
        failures: u32,
    },
    /// A command succeeded; carries the values known after it.
    Contact {
        display: DisplayId,
        values: DisplayValues,
        at: DateTime<Utc>,
    },
    /// The display left the registry.
    Removed { display: DisplayId },
}

impl StatusEvent {
    pub fn display(&self) -> &DisplayId {
        match self {
            Self::Link { display, .. } | Self::Contact { display, .. } | Self::Removed { display } => {
                display
            }
        }
    }
}

// ── Snapshot ─────────────────────────────────────────────────────

/// What is known about one display.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplayStatus {
    pub link: LinkState,
    pub values: DisplayValues,
    pub last_seen: Option<DateTime<Utc>>,
    pub failures: u32,
}

/// Point-in-time copy of the whole fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Utc>,
    pub displays: BTreeMap<DisplayId, DisplayStatus>,
}

impl StatusSnapshot {
    pub fn get(&self, id: &DisplayId) -> Option<&DisplayStatus> {
        self.displays.get(id)
    }

    pub fn len(&self) -> usize {
        self.displays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }
}

// ── Subscriptions ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ── StatusAggregator ─────────────────────────────────────────────

/// Cheap to clone; all clones share one view.
#[derive(Debug, Clone, Default)]
pub struct StatusAggregator {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    displays: DashMap<DisplayId, DisplayStatus>,
    subscribers: DashMap<SubscriptionId, mpsc::UnboundedSender<StatusEvent>>,
    next_subscription: AtomicU64,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a display with an empty, disconnected entry.
    pub fn track(&self, id: &DisplayId) {
        self.inner.displays.entry(id.clone()).or_default();
    }

    /// Drop a display from the view and tell subscribers.
    pub fn forget(&self, id: &DisplayId) {
        self.publish(StatusEvent::Removed {
            display: id.clone(),
        });
    }

    /// Fold an event into the view, then fan it out.
    pub fn publish(&self, event: StatusEvent) {
        match &event {
            StatusEvent::Link {
                display,
                state,
                failures,
                ..
            } => {
                let mut entry = self.inner.displays.entry(display.clone()).or_default();
                entry.link = *state;
                entry.failures = *failures;
            }
            StatusEvent::Contact {
                display,
                values,
                at,
            } => {
                let mut entry = self.inner.displays.entry(display.clone()).or_default();
                entry.values = values.clone();
                entry.last_seen = Some(*at);
            }
            StatusEvent::Removed { display } => {
                self.inner.displays.remove(display);
            }
        }

        // Receivers that went away are pruned here.
        self.inner.subscribers.retain(|id, tx| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                tracing::debug!(subscription = %id, "pruned dead status subscriber");
            }
            alive
        });
    }

    pub fn get_snapshot(&self) -> StatusSnapshot {
        let displays = self
            .inner
            .displays
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        StatusSnapshot {
            taken_at: Utc::now(),
            displays,
        }
    }

    pub fn display(&self, id: &DisplayId) -> Option<DisplayStatus> {
        self.inner.displays.get(id).map(|entry| entry.value().clone())
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<StatusEvent>) {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Returns `false` if the subscription was unknown or already pruned.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

//! Typed notifications.
//!
//! # Responsibility
//! - Offer one publisher per event type with its own payload struct.
//! - Deliver events synchronously on whichever thread triggers them.
//!
//! # Invariants
//! - Subscribers run after the subscriber list lock is released, so a
//!   subscriber may subscribe or unsubscribe.
//! - Events are published while the exclusive gate is held; a subscriber
//!   that tries to acquire the gate on the same thread deadlocks.

use crate::alarm::book::AlarmRecord;
use crate::model::item::ItemId;
use crate::model::occurrence::AlarmId;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by `Publisher::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Subscriber list of one event type.
pub struct Publisher<E> {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber<E>)>>,
}

impl<E> Default for Publisher<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }
}

impl<E> std::fmt::Debug for Publisher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}

impl<E> Publisher<E> {
    pub fn subscribe(&self, subscriber: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, Arc::new(subscriber)));
        id
    }

    /// Returns whether `id` was subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn publish(&self, event: &E) {
        let subscribers = self
            .subscribers
            .read()
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect::<Vec<_>>();
        for subscriber in subscribers {
            subscriber(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCreated {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOpened {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreClosed {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCopied {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsDeleted {
    pub store: PathBuf,
    /// Deletion order: children before parents.
    pub items: Vec<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmFired {
    pub alarm: AlarmRecord,
    /// Set for snoozed alarms whose snooze expired while no timer was
    /// watching.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmCleared {
    pub alarm: AlarmId,
}

/// One publisher per notification.
#[derive(Debug, Default)]
pub struct EventBus {
    pub store_created: Publisher<StoreCreated>,
    pub store_opened: Publisher<StoreOpened>,
    pub store_closed: Publisher<StoreClosed>,
    pub store_copied: Publisher<StoreCopied>,
    pub items_deleted: Publisher<ItemsDeleted>,
    pub alarm_fired: Publisher<AlarmFired>,
    pub alarm_cleared: Publisher<AlarmCleared>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

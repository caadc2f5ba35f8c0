//! Capture notifications.
//!
//! The writer actor publishes a [`StoreNotification`] after every successful
//! capture. Interested parties hold a [`Subscription`] and poll it from their
//! own thread; dropping the subscription (or calling
//! [`Subscription::unsubscribe`]) removes it from the list.
//!
//! Each subscription buffers at most [`SUBSCRIPTION_CAPACITY`] notifications.
//! Once a subscriber falls that far behind, further notifications for it are
//! dropped until it drains; the writer never blocks on a slow subscriber.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::storage::types::EventId;

/// Notifications buffered per subscription before new ones are dropped.
pub const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreNotification {
    /// A captured event was committed.
    Captured { record_id: i64, event_id: EventId },
}

/// Subscription list shared between the store and its writer actor.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, SyncSender<StoreNotification>)>>,
}

impl Observers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, SyncSender<StoreNotification>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::sync_channel(SUBSCRIPTION_CAPACITY);
        self.lock().push((id, tx));
        tracing::debug!(subscription = id, "Observer subscribed");

        Subscription {
            id,
            rx,
            observers: Arc::clone(self),
        }
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(sub_id, _)| *sub_id != id);
        tracing::debug!(subscription = id, "Observer unsubscribed");
    }

    /// Send to every live subscriber without blocking, pruning ones whose
    /// receiver is gone. A full subscriber keeps its place but misses this
    /// notification. Returns the number of subscribers still registered.
    pub fn notify(&self, notification: &StoreNotification) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|(id, tx)| match tx.try_send(notification.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(subscription = *id, "Subscriber is full, notification dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        subscribers.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Receiving end of a store subscription.
pub struct Subscription {
    id: u64,
    rx: Receiver<StoreNotification>,
    observers: Arc<Observers>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Next pending notification, without blocking.
    pub fn try_recv(&self) -> Option<StoreNotification> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next notification.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StoreNotification> {
        match self.rx.recv_timeout(timeout) {
            Ok(n) => Some(n),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// All pending notifications. A list view typically refreshes once per
    /// non-empty drain.
    pub fn drain(&self) -> Vec<StoreNotification> {
        self.rx.try_iter().collect()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.observers.remove(self.id);
    }
}

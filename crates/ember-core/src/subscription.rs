//! Listener lists and unsubscribe handles.
//!
//! Config watchers, event-bus subscribers, loader watchers and store
//! observers all share the same shape: an ordered list of callbacks that is
//! snapshotted before invocation so no lock is held while user code runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Ordered list of callbacks, invoked in subscription order.
pub struct ListenerList<F: ?Sized> {
    inner: Arc<Mutex<Vec<(u64, Arc<F>)>>>,
    next_id: AtomicU64,
}

impl<F: ?Sized + Send + Sync + 'static> ListenerList<F> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Appends a listener and returns a handle that removes it.
    pub fn add(&self, listener: Arc<F>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().push((id, listener));
        let weak: Weak<Mutex<Vec<(u64, Arc<F>)>>> = Arc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(list) = weak.upgrade() {
                list.lock().retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Removes the listener with the given id. Returns `true` if it existed.
    pub fn remove(&self, id: u64) -> bool {
        let mut list = self.inner.lock();
        let before = list.len();
        list.retain(|(entry, _)| *entry != id);
        list.len() != before
    }

    /// Returns the current listeners in subscription order.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.inner
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<F: ?Sized + Send + Sync + 'static> Default for ListenerList<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every `watch`/`on`/`subscribe` operation.
///
/// Dropping the handle does **not** unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe) explicitly.
pub struct Subscription {
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Creates a handle that runs `cancel` once on unsubscribe.
    pub fn new(id: u64, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Combines several handles into one that cancels all of them.
    pub fn merge(subscriptions: Vec<Subscription>) -> Self {
        let id = subscriptions.first().map(|s| s.id).unwrap_or_default();
        Self::new(id, move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    /// Identifier of the listener within its list.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

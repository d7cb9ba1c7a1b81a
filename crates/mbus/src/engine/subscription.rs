// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Subscription table and dispatch.
//!
//! Subscriptions are (filter, callback) pairs in a flat list; lookup is a
//! linear scan, cheap per filter. The table lock is held only long enough
//! to snapshot matching entries - the matcher and the callbacks run without
//! any lock, so a slow subscriber can never block `subscribe`/`unsubscribe`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::PeerId;
use crate::topic::TopicFilter;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// A delivered message as seen by subscriber callbacks.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub peer: PeerId,
    pub sequence: u32,
}

/// Subscriber callback. Runs on the receive task: per-peer ordered
/// delivery stalls for as long as a callback runs, so callbacks must not
/// block indefinitely.
pub type Callback = dyn Fn(&Message) + Send + Sync + 'static;

struct Entry {
    id: SubscriptionId,
    filter: TopicFilter,
    callback: Arc<Callback>,
}

/// Registered subscriptions for one bus.
pub struct SubscriptionTable {
    entries: Mutex<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a subscription; the filter is already compiled.
    pub fn insert(&self, filter: TopicFilter, callback: Arc<Callback>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push(Arc::new(Entry {
            id,
            filter,
            callback,
        }));
        id
    }

    /// Remove a subscription. Returns whether it existed. An in-flight
    /// dispatch that already snapshotted the entry may still fire once.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Deliver `message` to every matching subscription, in registration
    /// order. The topic is segmented once; matching and callbacks run
    /// outside the table lock. A panicking callback is isolated and logged.
    pub fn dispatch(&self, message: &Message) {
        let snapshot: Vec<Arc<Entry>> = self.entries.lock().clone();
        if snapshot.is_empty() {
            return;
        }

        let segments: Vec<&str> = message.topic.split('.').collect();
        for entry in &snapshot {
            if !entry.filter.matches(&segments) {
                continue;
            }
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (entry.callback)(message);
            }));
            if result.is_err() {
                log::error!(
                    "[Dispatch] subscriber {:?} panicked on topic '{}'; delivery continues",
                    entry.id,
                    message.topic
                );
            }
        }
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}

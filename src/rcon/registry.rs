//! Active push subscriptions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use super::protocol::{Response, Tag};

/// Callback receiving the `success` payload of every matching push.
///
/// Invoked synchronously on the connection task; keep it short.
pub type PushListener = Arc<dyn Fn(Value) + Send + Sync>;

/// One registered subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub tag: Tag,
    pub source: String,
    pub show_previous: bool,
    pub active: bool,
    /// Connection epoch the subscription was last sent on.
    pub epoch: u64,
}

/// Subscriptions by tag, forwarding pushes to a single listener.
pub struct SubscriptionRegistry {
    active: Mutex<HashMap<Tag, Subscription>>,
    listener: PushListener,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active", &self.lock_active().len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    pub fn new(listener: PushListener) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            listener,
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<Tag, Subscription>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a subscription active as of `epoch`.
    pub fn activate(&self, tag: Tag, source: &str, show_previous: bool, epoch: u64) {
        let subscription = Subscription {
            tag: tag.clone(),
            source: source.to_string(),
            show_previous,
            active: true,
            epoch,
        };
        self.lock_active().insert(tag, subscription);
    }

    /// Forward a push to the listener if its tag is active.
    ///
    /// Returns whether the listener was invoked.
    pub fn deliver(&self, push: Response) -> bool {
        let known = self
            .lock_active()
            .get(&push.tag)
            .is_some_and(|subscription| subscription.active);

        if !known {
            debug!(tag = %push.tag, source = %push.source, "Dropping push for unknown tag");
            return false;
        }

        if !push.is_success() {
            warn!(
                tag = %push.tag,
                source = %push.source,
                error = ?push.error,
                "Subscription push reported an error"
            );
            return false;
        }

        // Lock is released before the listener runs so it may subscribe again
        (self.listener)(push.success.unwrap_or(Value::Null));
        true
    }

    /// Subscriptions last sent on an epoch older than `epoch`, stamped as
    /// sent on `epoch`.
    pub fn reissue_for(&self, epoch: u64) -> Vec<Subscription> {
        let mut active = self.lock_active();
        let stale: Vec<Subscription> = active
            .values_mut()
            .filter(|subscription| subscription.active && subscription.epoch < epoch)
            .map(|subscription| {
                subscription.epoch = epoch;
                subscription.clone()
            })
            .collect();
        stale
    }

    pub fn is_active(&self, tag: &Tag) -> bool {
        self.lock_active()
            .get(tag)
            .is_some_and(|subscription| subscription.active)
    }

    /// Snapshot of every subscription, ordered by source then tag.
    pub fn snapshot(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = self.lock_active().values().cloned().collect();
        subscriptions.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then_with(|| a.tag.as_str().cmp(b.tag.as_str()))
        });
        subscriptions
    }
}

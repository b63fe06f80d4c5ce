use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use sayit_types::events::{EventPayload, GatewayEvent, SnapshotState};
use sayit_types::models::Target;

use crate::error::CoreError;

/// Outbound channel of one connected client. Every subscription of that client
/// shares it.
pub type EventSender = mpsc::UnboundedSender<GatewayEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Receiving events.
    Active,
    /// Terminal: unsubscribed, replaced, or the client went away.
    Closed,
}

/// Fans events out to the subscriptions of each target.
///
/// Each target has its own lock. A subscribe holds it while the snapshot is
/// built and registered, and a publish holds it while sending, so a
/// subscriber never misses an event published after its snapshot was taken.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    targets: RwLock<HashMap<Target, Arc<Mutex<TargetSubscribers>>>>,
}

#[derive(Default)]
struct TargetSubscribers {
    /// subscriber_id -> sender. At most one registration per pair.
    subscriptions: HashMap<Uuid, EventSender>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber_id` for `target`, replacing any earlier registration
    /// of the same pair. `snapshot` runs under the target lock; its result is
    /// sent before any event. If the snapshot fails nothing is registered.
    pub fn subscribe<F>(
        &self,
        subscriber_id: Uuid,
        target: Target,
        sender: EventSender,
        snapshot: F,
    ) -> Result<SubscriptionState, CoreError>
    where
        F: FnOnce() -> Result<SnapshotState, CoreError>,
    {
        let slot = self.slot(target);
        let state = {
            let mut subs = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match snapshot() {
                Ok(state) => {
                    subs.subscriptions.remove(&subscriber_id);
                    if sender.send(GatewayEvent::Snapshot { target, state }).is_ok() {
                        subs.subscriptions.insert(subscriber_id, sender);
                        Ok(SubscriptionState::Active)
                    } else {
                        debug!("Subscriber {} gone before snapshot of {}", subscriber_id, target);
                        Ok(SubscriptionState::Closed)
                    }
                }
                Err(e) => Err(e),
            }
        };
        drop(slot);

        if !matches!(state, Ok(SubscriptionState::Active)) {
            self.release_if_empty(target);
        }
        state
    }

    /// Close the subscription. Returns whether it was active. Events already
    /// queued on the client's channel are not retracted.
    pub fn unsubscribe(&self, subscriber_id: Uuid, target: Target) -> bool {
        let Some(slot) = self.existing_slot(target) else {
            return false;
        };
        let removed = {
            let mut subs = slot.lock().unwrap_or_else(PoisonError::into_inner);
            subs.subscriptions.remove(&subscriber_id).is_some()
        };
        drop(slot);

        if removed {
            self.release_if_empty(target);
        }
        removed
    }

    /// Deliver `payload` to every active subscription of `target`, in call
    /// order. Subscriptions whose client is gone are closed on the spot.
    /// Returns the number of subscriptions that received the event.
    pub fn publish(&self, target: Target, payload: EventPayload) -> usize {
        let Some(slot) = self.existing_slot(target) else {
            return 0;
        };

        let event = GatewayEvent::Event { target, payload };
        let (delivered, now_empty) = {
            let mut subs = slot.lock().unwrap_or_else(PoisonError::into_inner);
            let mut delivered = 0;
            subs.subscriptions.retain(|subscriber_id, sender| {
                if sender.send(event.clone()).is_ok() {
                    delivered += 1;
                    true
                } else {
                    debug!("Closing subscription {} on {}: client gone", subscriber_id, target);
                    false
                }
            });
            (delivered, subs.subscriptions.is_empty())
        };
        drop(slot);

        if now_empty {
            self.release_if_empty(target);
        }
        trace!("Published to {} ({} subscribers)", target, delivered);
        delivered
    }

    pub fn state(&self, subscriber_id: Uuid, target: Target) -> SubscriptionState {
        let Some(slot) = self.existing_slot(target) else {
            return SubscriptionState::Closed;
        };
        let subs = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if subs.subscriptions.contains_key(&subscriber_id) {
            SubscriptionState::Active
        } else {
            SubscriptionState::Closed
        }
    }

    pub fn subscriber_count(&self, target: Target) -> usize {
        let Some(slot) = self.existing_slot(target) else {
            return 0;
        };
        let count = slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscriptions
            .len();
        count
    }

    fn existing_slot(&self, target: Target) -> Option<Arc<Mutex<TargetSubscribers>>> {
        self.inner
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target)
            .cloned()
    }

    fn slot(&self, target: Target) -> Arc<Mutex<TargetSubscribers>> {
        if let Some(slot) = self.existing_slot(target) {
            return slot;
        }
        self.inner
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(target)
            .or_default()
            .clone()
    }

    /// Drop the target entry once nobody subscribes and nobody else holds it.
    fn release_if_empty(&self, target: Target) {
        let mut targets = self
            .inner
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removable = targets.get(&target).is_some_and(|slot| {
            Arc::strong_count(slot) == 1
                && slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .subscriptions
                    .is_empty()
        });
        if removable {
            targets.remove(&target);
        }
    }
}

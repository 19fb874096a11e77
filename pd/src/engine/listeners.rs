//! Listener registry and notification fan-out
//!
//! Listeners subscribe per trigger type, or under the wildcard bucket to
//! observe every event. Registration returns a [`Subscription`] handle;
//! dropping or revoking it ends delivery. Revoked slots are skipped and
//! pruned during notification, so a vanished listener is never an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::domain::{Event, EventStatus, TriggerType};

/// Observer interface for event outcomes
///
/// `on_event_rejected` fires when an event will not execute (carries the
/// rejection or failure reason); `on_event_processed` fires when an event
/// that reached the head of the queue is finished. Callbacks are invoked
/// synchronously in registration order and must not block.
pub trait EventListener: Send + Sync {
    fn on_event_rejected(&self, event: &Event, reason: EventStatus);
    fn on_event_processed(&self, event: &Event, success: bool);
}

/// Handle returned by registration; delivery stops when it is revoked or
/// dropped
pub struct Subscription {
    token: Uuid,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Stop delivery to the associated listener
    pub fn revoke(&self) {
        debug!(token = %self.token, "Subscription: revoked");
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

struct Slot {
    token: Uuid,
    active: Arc<AtomicBool>,
    listener: Arc<dyn EventListener>,
}

#[derive(Default)]
struct RegistryInner {
    wildcard: Vec<Slot>,
    by_trigger: HashMap<TriggerType, Vec<Slot>>,
}

/// Registry of event listeners, keyed by trigger type plus a wildcard bucket
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one trigger type, or for everything when
    /// `trigger` is `None`
    pub fn register(&self, listener: Arc<dyn EventListener>, trigger: Option<TriggerType>) -> Subscription {
        let token = Uuid::now_v7();
        let active = Arc::new(AtomicBool::new(true));
        debug!(%token, ?trigger, "ListenerRegistry: registering listener");

        let slot = Slot {
            token,
            active: active.clone(),
            listener,
        };

        let mut inner = lock_inner(&self.inner);
        match trigger {
            None => inner.wildcard.push(slot),
            Some(t) => inner.by_trigger.entry(t).or_default().push(slot),
        }

        Subscription { token, active }
    }

    /// Notify the wildcard bucket, then the event's own trigger bucket
    pub fn notify_rejected(&self, event: &Event, reason: EventStatus) {
        for listener in self.collect(event.trigger()) {
            listener.on_event_rejected(event, reason);
        }
    }

    /// Notify the wildcard bucket, then the event's own trigger bucket
    pub fn notify_processed(&self, event: &Event, success: bool) {
        for listener in self.collect(event.trigger()) {
            listener.on_event_processed(event, success);
        }
    }

    /// Snapshot live listeners for an event, pruning revoked slots
    ///
    /// Callbacks run outside the registry lock, so a listener may register
    /// or revoke from inside its own callback.
    fn collect(&self, trigger: TriggerType) -> Vec<Arc<dyn EventListener>> {
        let mut inner = lock_inner(&self.inner);
        let mut out = Vec::new();

        prune(&mut inner.wildcard);
        for slot in &inner.wildcard {
            out.push(slot.listener.clone());
        }

        if let Some(slots) = inner.by_trigger.get_mut(&trigger) {
            prune(slots);
            for slot in slots.iter() {
                out.push(slot.listener.clone());
            }
        }

        out
    }
}

fn prune(slots: &mut Vec<Slot>) {
    slots.retain(|slot| {
        let live = slot.active.load(Ordering::SeqCst);
        if !live {
            debug!(token = %slot.token, "ListenerRegistry: pruning revoked listener");
        }
        live
    });
}

fn lock_inner(m: &Mutex<RegistryInner>) -> std::sync::MutexGuard<'_, RegistryInner> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

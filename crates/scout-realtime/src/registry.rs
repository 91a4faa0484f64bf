//! Event-type subscription registry.
//!
//! Maps an event type to the handlers registered for it, in registration
//! order. Dispatch snapshots the handler list and releases the lock before
//! calling anything, so handlers may subscribe or unsubscribe (themselves
//! included) while a frame is being delivered.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Callback invoked with each parsed payload of its event type.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Entry {
    id: u64,
    live: Arc<AtomicBool>,
    handler: Handler,
}

/// Handlers keyed by event type.
#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`.
    pub fn subscribe(
        self: &Arc<Self>,
        event_type: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let event_type = event_type.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let live = Arc::new(AtomicBool::new(true));
        self.handlers
            .lock()
            .entry(event_type.clone())
            .or_default()
            .push(Entry {
                id,
                live: Arc::clone(&live),
                handler: Arc::new(handler),
            });
        debug!(event_type = %event_type, subscription_id = id, "handler subscribed");
        Subscription {
            registry: Arc::downgrade(self),
            event_type,
            id,
            live,
        }
    }

    /// Invoke every live handler registered for `event_type`.
    ///
    /// Returns how many handlers ran (panicked ones included). A panicking
    /// handler is logged and does not stop the rest.
    pub fn dispatch(&self, event_type: &str, payload: &Value) -> usize {
        let snapshot: Vec<(u64, Arc<AtomicBool>, Handler)> = {
            let handlers = self.handlers.lock();
            let Some(entries) = handlers.get(event_type) else {
                return 0;
            };
            entries
                .iter()
                .map(|e| (e.id, Arc::clone(&e.live), Arc::clone(&e.handler)))
                .collect()
        };

        let mut invoked = 0;
        for (id, live, handler) in snapshot {
            // Removed by an earlier handler in this same dispatch.
            if !live.load(Ordering::Acquire) {
                continue;
            }
            invoked += 1;
            let result = catch_unwind(AssertUnwindSafe(|| handler(payload)));
            if result.is_err() {
                error!(event_type, subscription_id = id, "event handler panicked");
            }
        }
        invoked
    }

    /// Number of handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.lock().get(event_type).map_or(0, Vec::len)
    }

    /// Event types with at least one handler, sorted.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.lock().keys().cloned().collect();
        types.sort();
        types
    }

    fn remove(&self, event_type: &str, id: u64) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(entries) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            let _ = handlers.remove(event_type);
        }
        removed
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.lock();
        let counts: HashMap<&str, usize> =
            handlers.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("SubscriptionRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

/// Handle to one registered handler.
///
/// Dropping it leaves the handler registered; call [`Self::unsubscribe`] to
/// remove it.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<SubscriptionRegistry>,
    event_type: String,
    id: u64,
    live: Arc<AtomicBool>,
}

impl Subscription {
    /// Remove exactly this handler. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        if !self.live.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if registry.remove(&self.event_type, self.id) {
            debug!(event_type = %self.event_type, subscription_id = self.id, "handler unsubscribed");
        }
    }

    /// Whether the handler is still registered.
    pub fn is_active(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Event type this handler listens to.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// Consumer-facing subscribe surface.
///
/// Cheap to clone. Every clone handed out by a client refers to the same
/// registry, so consumers can hold on to it across restarts of the
/// connection.
#[derive(Clone, Debug)]
pub struct StreamSubscriber {
    registry: Arc<SubscriptionRegistry>,
}

impl StreamSubscriber {
    pub(crate) fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Register `handler` for `event_type`.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.registry.subscribe(event_type, handler)
    }

    /// Register a handler that receives payloads deserialized into `T`.
    ///
    /// Payloads that do not match `T` are logged and skipped.
    pub fn subscribe_typed<T, F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let label = event_type.clone();
        self.registry
            .subscribe(event_type, move |payload| match T::deserialize(payload) {
                Ok(value) => handler(value),
                Err(e) => warn!(
                    event_type = %label,
                    error = %e,
                    "payload does not match subscriber type, skipping"
                ),
            })
    }

    /// Whether both subscribers feed from the same registry.
    pub fn same_registry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &Value| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_reaches_matching_handlers_only() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (jobs, on_jobs) = counter();
        let (other, on_other) = counter();
        let _a = registry.subscribe("job.matched", on_jobs);
        let _b = registry.subscribe("application.updated", on_other);

        assert_eq!(registry.dispatch("job.matched", &json!({"id": 1})), 1);
        assert_eq!(jobs.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_to_unknown_type_is_noop() {
        let registry = Arc::new(SubscriptionRegistry::new());
        assert_eq!(registry.dispatch("nobody", &json!({})), 0);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            let _ = registry.subscribe("t", move |_| order.lock().push(n));
        }
        let _ = registry.dispatch("t", &json!(null));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn handler_receives_payload() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let _sub = registry.subscribe("t", move |v| *s.lock() = Some(v.clone()));
        let _ = registry.dispatch("t", &json!({"stage": "offer"}));
        assert_eq!(*seen.lock(), Some(json!({"stage": "offer"})));
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (first, on_first) = counter();
        let (second, on_second) = counter();
        let a = registry.subscribe("t", on_first);
        let _b = registry.subscribe("t", on_second);

        a.unsubscribe();
        assert!(!a.is_active());
        let _ = registry.dispatch("t", &json!(1));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count("t"), 1);
    }

    #[test]
    fn unsubscribe_twice_is_noop() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (_, on) = counter();
        let (_, on_other) = counter();
        let sub = registry.subscribe("t", on);
        let _keep = registry.subscribe("t", on_other);
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(registry.handler_count("t"), 1);
    }

    #[test]
    fn last_unsubscribe_drops_event_type() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (_, on) = counter();
        let sub = registry.subscribe("t", on);
        assert_eq!(registry.event_types(), vec!["t".to_string()]);
        sub.unsubscribe();
        assert!(registry.event_types().is_empty());
    }

    #[test]
    fn dropping_subscription_keeps_handler() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (count, on) = counter();
        drop(registry.subscribe("t", on));
        let _ = registry.dispatch("t", &json!(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_after_registry_dropped() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (_, on) = counter();
        let sub = registry.subscribe("t", on);
        drop(registry);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn handler_can_unsubscribe_itself_during_dispatch() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let self_calls = Arc::new(AtomicUsize::new(0));
        let (sibling, on_sibling) = counter();

        let s = Arc::clone(&slot);
        let c = Arc::clone(&self_calls);
        let sub = registry.subscribe("t", move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = s.lock().as_ref() {
                me.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);
        let _sibling = registry.subscribe("t", on_sibling);

        let _ = registry.dispatch("t", &json!(1));
        let _ = registry.dispatch("t", &json!(2));
        assert_eq!(self_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sibling.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_removed_mid_dispatch_is_skipped() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (victim_count, on_victim) = counter();

        let s = Arc::clone(&victim_slot);
        let _killer = registry.subscribe("t", move |_| {
            if let Some(victim) = s.lock().as_ref() {
                victim.unsubscribe();
            }
        });
        *victim_slot.lock() = Some(registry.subscribe("t", on_victim));

        assert_eq!(registry.dispatch("t", &json!(1)), 1);
        assert_eq!(victim_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_subscribed_mid_dispatch_runs_next_time() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (late, on_late) = counter();
        let on_late = Arc::new(on_late);
        let reg = Arc::clone(&registry);
        let added = Arc::new(AtomicBool::new(false));
        let a = Arc::clone(&added);
        let _adder = registry.subscribe("t", move |_| {
            if !a.swap(true, Ordering::SeqCst) {
                let on_late = Arc::clone(&on_late);
                let _ = reg.subscribe("t", move |v| on_late(v));
            }
        });

        let _ = registry.dispatch("t", &json!(1));
        assert_eq!(late.load(Ordering::SeqCst), 0);
        let _ = registry.dispatch("t", &json!(2));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_siblings() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (after, on_after) = counter();
        let _boom = registry.subscribe("t", |_| panic!("handler failure"));
        let _ok = registry.subscribe("t", on_after);

        assert_eq!(registry.dispatch("t", &json!(1)), 2);
        let _ = registry.dispatch("t", &json!(2));
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct JobMatched {
        id: u32,
        title: String,
    }

    #[test]
    fn typed_subscription_deserializes() {
        let subscriber = StreamSubscriber::new(Arc::new(SubscriptionRegistry::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = subscriber.subscribe_typed("job.matched", move |job: JobMatched| {
            s.lock().push(job);
        });

        let _ = subscriber
            .registry
            .dispatch("job.matched", &json!({"id": 3, "title": "Rust engineer"}));
        let _ = subscriber.registry.dispatch("job.matched", &json!({"id": "bad"}));

        assert_eq!(
            *seen.lock(),
            vec![JobMatched {
                id: 3,
                title: "Rust engineer".into()
            }]
        );
    }

    #[test]
    fn subscriber_clones_share_registry() {
        let subscriber = StreamSubscriber::new(Arc::new(SubscriptionRegistry::new()));
        let clone = subscriber.clone();
        assert!(subscriber.same_registry(&clone));

        let other = StreamSubscriber::new(Arc::new(SubscriptionRegistry::new()));
        assert!(!subscriber.same_registry(&other));
    }
}

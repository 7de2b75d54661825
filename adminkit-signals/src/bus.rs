//! In-process signal bus with wildcard subscriptions.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use adminkit_utils::{execution_order, Registration, PRIORITY_NORMAL};
use serde_json::{json, Value};

use crate::error::SignalError;
use crate::pattern::SignalPattern;

/// Diagnostic signal emitted when a handler panics. Never re-entered.
pub const HANDLER_ERROR_SIGNAL: &str = "signal:handler:error";

/// A delivered signal: the concrete emitted name plus its payload.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub name: String,
    pub payload: Value,
}

type Handler = Arc<dyn Fn(&SignalEvent) + Send + Sync>;

/// Options for [`SignalBus::on`].
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Higher runs earlier. Defaults to [`PRIORITY_NORMAL`].
    pub priority: i32,
    /// Stable id other subscriptions can reference via `after`.
    pub id: Option<String>,
    /// Ids of handlers that must run before this one.
    pub after: Vec<String>,
    /// Remove the subscription after its first invocation.
    pub once: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: PRIORITY_NORMAL,
            id: None,
            after: Vec::new(),
            once: false,
        }
    }
}

impl SubscribeOptions {
    pub fn priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_after(mut self, after: &[&str]) -> Self {
        self.after = after.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

struct Subscription {
    token: u64,
    priority: i32,
    id: Option<String>,
    after: Vec<String>,
    once: bool,
    handler: Handler,
}

struct Bucket {
    pattern: SignalPattern,
    subs: Vec<Subscription>,
}

struct Inner {
    buckets: RwLock<std::collections::HashMap<String, Bucket>>,
    next_seq: AtomicU64,
}

/// Handle returned by [`SignalBus::on`]; detaches the handler on
/// [`unsubscribe`](SignalSubscription::unsubscribe).
pub struct SignalSubscription {
    inner: Weak<Inner>,
    pattern: String,
    token: u64,
}

impl SignalSubscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut buckets = inner.buckets.write().expect("signal bus lock poisoned");
            if let Some(bucket) = buckets.get_mut(&self.pattern) {
                bucket.subs.retain(|s| s.token != self.token);
                if bucket.subs.is_empty() {
                    buckets.remove(&self.pattern);
                }
            }
        }
    }
}

/// Event-driven pub/sub keyed by colon-delimited names.
///
/// Matching forms: exact (`books:created`), prefix wildcard (`books:*`),
/// suffix wildcard (`*:created`), catch-all (`**`). Handlers for one
/// emission run synchronously in a deterministic order (priority, `after`
/// constraints, registration order); their return values are ignored and
/// panics are isolated — logged and surfaced as a
/// [`HANDLER_ERROR_SIGNAL`] emission, never propagated to the emitter.
///
/// `SignalBus` is `Clone` and can be shared across threads.
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<Inner>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

struct Matched {
    token: u64,
    once: bool,
    pattern: String,
    id: Option<String>,
    handler: Handler,
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                buckets: RwLock::new(std::collections::HashMap::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe a handler to a name or wildcard pattern.
    pub fn on<F>(&self, pattern: &str, handler: F, options: SubscribeOptions) -> SignalSubscription
    where
        F: Fn(&SignalEvent) + Send + Sync + 'static,
    {
        let token = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let sub = Subscription {
            token,
            priority: options.priority,
            id: options.id,
            after: options.after,
            once: options.once,
            handler: Arc::new(handler),
        };
        let mut buckets = self.inner.buckets.write().expect("signal bus lock poisoned");
        buckets
            .entry(pattern.to_string())
            .or_insert_with(|| Bucket {
                pattern: SignalPattern::parse(pattern),
                subs: Vec::new(),
            })
            .subs
            .push(sub);
        SignalSubscription {
            inner: Arc::downgrade(&self.inner),
            pattern: pattern.to_string(),
            token,
        }
    }

    /// Remove every handler registered under the given pattern string.
    pub fn off(&self, pattern: &str) {
        self.inner
            .buckets
            .write()
            .expect("signal bus lock poisoned")
            .remove(pattern);
    }

    /// Remove all subscriptions.
    pub fn off_all(&self) {
        self.inner
            .buckets
            .write()
            .expect("signal bus lock poisoned")
            .clear();
    }

    /// Emit a signal to every matching handler.
    pub fn emit(&self, name: &str, payload: Value) {
        let mut seen = HashSet::new();
        self.emit_excluding(name, payload, &mut seen);
    }

    /// Emit the entity lifecycle pair: `<entity>:<action>` then
    /// `entity:<action>`, both with payload `{ entity, data }`.
    ///
    /// A wildcard subscription matching both names (e.g. `*:created`) is
    /// invoked exactly once, on the first matching emission.
    pub fn emit_entity(&self, entity: &str, action: &str, data: Value) {
        let payload = json!({ "entity": entity, "data": data });
        let mut seen = HashSet::new();
        self.emit_excluding(&format!("{entity}:{action}"), payload.clone(), &mut seen);
        self.emit_excluding(&format!("entity:{action}"), payload, &mut seen);
    }

    /// Await the next signal matching `name`, with an optional timeout.
    pub async fn once(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<SignalEvent, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let sub = self.on(
            name,
            move |event| {
                if let Some(tx) = slot.lock().expect("once slot poisoned").take() {
                    let _ = tx.send(event.clone());
                }
            },
            SubscribeOptions::default().once(),
        );
        match timeout {
            Some(waited) => match tokio::time::timeout(waited, rx).await {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(_)) => Err(SignalError::Closed(name.to_string())),
                Err(_) => {
                    sub.unsubscribe();
                    Err(SignalError::Timeout {
                        signal: name.to_string(),
                        waited,
                    })
                }
            },
            None => rx.await.map_err(|_| SignalError::Closed(name.to_string())),
        }
    }

    /// Number of live subscriptions matching the given emitted name.
    pub fn handler_count(&self, name: &str) -> usize {
        let buckets = self.inner.buckets.read().expect("signal bus lock poisoned");
        buckets
            .values()
            .filter(|b| b.pattern.matches(name))
            .map(|b| b.subs.len())
            .sum()
    }

    fn emit_excluding(&self, name: &str, payload: Value, seen: &mut HashSet<u64>) {
        let matched = self.collect_matching(name, seen);
        let event = SignalEvent {
            name: name.to_string(),
            payload,
        };

        let mut fired_once = Vec::new();
        for sub in &matched {
            seen.insert(sub.token);
            let outcome = catch_unwind(AssertUnwindSafe(|| (sub.handler)(&event)));
            if sub.once {
                fired_once.push((sub.pattern.clone(), sub.token));
            }
            if let Err(panic) = outcome {
                let message = panic_message(panic);
                tracing::error!(signal = name, handler = ?sub.id, %message, "signal handler panicked");
                if name != HANDLER_ERROR_SIGNAL {
                    self.emit(
                        HANDLER_ERROR_SIGNAL,
                        json!({ "signal": name, "handler": sub.id, "error": message }),
                    );
                }
            }
        }

        if !fired_once.is_empty() {
            let mut buckets = self.inner.buckets.write().expect("signal bus lock poisoned");
            for (pattern, token) in fired_once {
                if let Some(bucket) = buckets.get_mut(&pattern) {
                    bucket.subs.retain(|s| s.token != token);
                    if bucket.subs.is_empty() {
                        buckets.remove(&pattern);
                    }
                }
            }
        }
    }

    /// Snapshot the handlers matching `name` in execution order, skipping
    /// tokens already present in `seen`.
    fn collect_matching(&self, name: &str, seen: &HashSet<u64>) -> Vec<Matched> {
        let buckets = self.inner.buckets.read().expect("signal bus lock poisoned");
        let mut regs = Vec::new();
        let mut subs = Vec::new();
        for (raw, bucket) in buckets.iter() {
            if !bucket.pattern.matches(name) {
                continue;
            }
            for sub in &bucket.subs {
                if seen.contains(&sub.token) {
                    continue;
                }
                regs.push(Registration {
                    id: sub.id.clone(),
                    priority: sub.priority,
                    after: sub.after.clone(),
                    seq: sub.token,
                });
                subs.push(Matched {
                    token: sub.token,
                    once: sub.once,
                    pattern: raw.clone(),
                    id: sub.id.clone(),
                    handler: sub.handler.clone(),
                });
            }
        }
        drop(buckets);

        execution_order(&regs)
            .into_iter()
            .map(|i| {
                let m = &subs[i];
                Matched {
                    token: m.token,
                    once: m.once,
                    pattern: m.pattern.clone(),
                    id: m.id.clone(),
                    handler: m.handler.clone(),
                }
            })
            .collect()
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn exact_emit_reaches_handler() {
        let bus = SignalBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        bus.on(
            "books:created",
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );

        bus.emit("books:created", json!({}));
        bus.emit("books:updated", json!({}));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn priority_orders_handlers() {
        let bus = SignalBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (tag, priority) in [("low", 25), ("first", 100), ("normal", 50)] {
            let order = order.clone();
            bus.on(
                "x:y",
                move |_| order.lock().unwrap().push(tag),
                SubscribeOptions::priority(priority),
            );
        }

        bus.emit("x:y", Value::Null);
        assert_eq!(*order.lock().unwrap(), vec!["first", "normal", "low"]);
    }

    #[test]
    fn after_constraint_defers_handler() {
        let bus = SignalBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        bus.on(
            "x:y",
            move |_| o.lock().unwrap().push("a"),
            SubscribeOptions::priority(75).with_id("a"),
        );
        let o = order.clone();
        bus.on(
            "x:y",
            move |_| o.lock().unwrap().push("b"),
            SubscribeOptions::default().with_id("b").with_after(&["a"]),
        );
        let o = order.clone();
        bus.on(
            "x:y",
            move |_| o.lock().unwrap().push("c"),
            SubscribeOptions::default().with_id("c"),
        );

        bus.emit("x:y", Value::Null);
        assert_eq!(*order.lock().unwrap(), vec!["a", "c", "b"]);
    }

    #[test]
    fn unsubscribe_detaches() {
        let bus = SignalBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let sub = bus.on(
            "a:b",
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );

        bus.emit("a:b", Value::Null);
        sub.unsubscribe();
        bus.emit("a:b", Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_subscription_fires_a_single_time() {
        let bus = SignalBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        bus.on(
            "a:b",
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default().once(),
        );

        bus.emit("a:b", Value::Null);
        bus.emit("a:b", Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count("a:b"), 0);
    }

    #[test]
    fn handler_panic_is_isolated() {
        let bus = SignalBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        bus.on(
            "a:b",
            |_| panic!("boom"),
            SubscribeOptions::priority(100).with_id("bad"),
        );
        let c = counter.clone();
        bus.on(
            "a:b",
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );
        let e = errors.clone();
        bus.on(
            HANDLER_ERROR_SIGNAL,
            move |event| {
                assert_eq!(event.payload["signal"], "a:b");
                assert_eq!(event.payload["error"], "boom");
                e.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );

        bus.emit("a:b", Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "later handlers still run");
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_entity_dedupes_wildcard_subscribers() {
        let bus = SignalBus::new();
        let books = Arc::new(AtomicUsize::new(0));
        let created = Arc::new(AtomicUsize::new(0));
        let entity = Arc::new(AtomicUsize::new(0));

        let c = books.clone();
        bus.on(
            "books:*",
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );
        let c = created.clone();
        bus.on(
            "*:created",
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );
        let c = entity.clone();
        bus.on(
            "entity:*",
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );

        bus.emit_entity("books", "created", json!({"id": "1"}));

        assert_eq!(books.load(Ordering::SeqCst), 1);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(entity.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_entity_emits_both_exact_names_with_identical_payload() {
        let bus = SignalBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["books:created", "entity:created"] {
            let seen = seen.clone();
            bus.on(
                name,
                move |event| seen.lock().unwrap().push((event.name.clone(), event.payload.clone())),
                SubscribeOptions::default(),
            );
        }

        bus.emit_entity("books", "created", json!({"id": "9"}));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "books:created");
        assert_eq!(seen[1].0, "entity:created");
        assert_eq!(seen[0].1, seen[1].1);
        assert_eq!(seen[0].1["entity"], "books");
    }

    #[tokio::test]
    async fn once_returns_next_event() {
        let bus = SignalBus::new();
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.once("auth:login", None).await })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.emit("auth:login", json!({"user": "u1"}));
        let event = waiter.await.unwrap().unwrap();
        assert_eq!(event.payload["user"], "u1");
    }

    #[tokio::test]
    async fn once_times_out() {
        let bus = SignalBus::new();
        let err = bus
            .once("never:emitted", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::Timeout { .. }));
        assert_eq!(bus.handler_count("never:emitted"), 0);
    }

    #[test]
    fn handlers_registered_during_emit_do_not_run_in_that_emission() {
        let bus = SignalBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let c = counter.clone();
        bus.on(
            "a:b",
            move |_| {
                let c = c.clone();
                inner_bus.on(
                    "a:b",
                    move |_| {
                        c.fetch_add(1, Ordering::SeqCst);
                    },
                    SubscribeOptions::default(),
                );
            },
            SubscribeOptions::default(),
        );

        bus.emit("a:b", Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        bus.emit("a:b", Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

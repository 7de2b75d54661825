//! Keyed promises resolvable before or after their producer registers.
//!
//! A consumer may `wait("entity:books:cache")` before anything has been
//! queued under that key; when a producer later calls `queue`, the earlier
//! waiter resolves with the executor's result. This await-before-queue
//! property is the sole reason the type exists.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::watch;

use crate::bus::SignalBus;
use crate::error::DeferredError;

/// Externally observable state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredStatus {
    /// Created by a `wait` (or external `resolve` target); no executor yet.
    Pending,
    /// An executor is running.
    Running,
    Completed,
    Failed,
}

enum State {
    Pending,
    Running,
    Completed(Value),
    Failed(String),
}

struct Entry {
    state: State,
    // Settlement broadcast; waiters subscribe and re-check state on change.
    tx: watch::Sender<()>,
}

impl Entry {
    fn new(state: State) -> Self {
        let (tx, _rx) = watch::channel(());
        Self { state, tx }
    }

    fn status(&self) -> DeferredStatus {
        match self.state {
            State::Pending => DeferredStatus::Pending,
            State::Running => DeferredStatus::Running,
            State::Completed(_) => DeferredStatus::Completed,
            State::Failed(_) => DeferredStatus::Failed,
        }
    }
}

/// A keyed map of resolvable promises.
///
/// Executors queued under a key run at most once until the key is cleared;
/// a failed executor leaves the key in `Failed` state and every waiter
/// (past and future) receives the rejection until `clear(key)`.
///
/// When constructed [`with_signals`](DeferredRegistry::with_signals), the
/// registry emits `deferred:started`, `deferred:completed`, and
/// `deferred:failed` with `{ key, value | error }` payloads.
#[derive(Clone)]
pub struct DeferredRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    signals: Option<SignalBus>,
}

impl Default for DeferredRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            signals: None,
        }
    }

    pub fn with_signals(signals: SignalBus) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            signals: Some(signals),
        }
    }

    /// Wait for the key to settle, creating a pending entry if unseen.
    ///
    /// Resolves with the queued executor's eventual result even when the
    /// wait was issued before the `queue` call.
    pub async fn wait(&self, key: &str) -> Result<Value, DeferredError> {
        loop {
            let mut rx = {
                let mut entries = self.entries.lock().expect("deferred lock poisoned");
                let entry = entries
                    .entry(key.to_string())
                    .or_insert_with(|| Entry::new(State::Pending));
                match &entry.state {
                    State::Completed(value) => return Ok(value.clone()),
                    State::Failed(message) => {
                        return Err(DeferredError::new(key, message.clone()))
                    }
                    _ => entry.tx.subscribe(),
                }
            };
            if rx.changed().await.is_err() {
                return Err(DeferredError::new(key, "cleared while waiting"));
            }
        }
    }

    /// Queue an executor for the key; at most one executor ever runs per
    /// key until [`clear`](DeferredRegistry::clear).
    ///
    /// If the key is unseen or pending-from-wait, the executor runs and its
    /// result settles the key (fulfilling earlier waiters). If the key is
    /// already running, this waits for that run. If the key is settled, the
    /// existing result is returned and the executor is dropped.
    pub async fn queue<F, Fut>(&self, key: &str, executor: F) -> Result<Value, DeferredError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, Box<dyn std::error::Error + Send + Sync>>>,
    {
        enum Claim {
            Settled(Result<Value, DeferredError>),
            AlreadyRunning,
            Ours,
        }
        let claim = {
            let mut entries = self.entries.lock().expect("deferred lock poisoned");
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(State::Pending));
            match &entry.state {
                State::Completed(value) => Claim::Settled(Ok(value.clone())),
                State::Failed(message) => {
                    Claim::Settled(Err(DeferredError::new(key, message.clone())))
                }
                State::Running => Claim::AlreadyRunning,
                State::Pending => {
                    entry.state = State::Running;
                    Claim::Ours
                }
            }
        };
        match claim {
            Claim::Settled(result) => return result,
            Claim::AlreadyRunning => return self.wait(key).await,
            Claim::Ours => {}
        }
        self.emit("deferred:started", json!({ "key": key }));

        match executor().await {
            Ok(value) => {
                self.settle(key, State::Completed(value.clone()));
                self.emit("deferred:completed", json!({ "key": key, "value": value }));
                Ok(value)
            }
            Err(err) => {
                let message = err.to_string();
                self.settle(key, State::Failed(message.clone()));
                self.emit("deferred:failed", json!({ "key": key, "error": message }));
                Err(DeferredError::new(key, message))
            }
        }
    }

    /// Fulfill an externally-owned key. A no-op when already settled.
    pub fn resolve(&self, key: &str, value: Value) {
        if self.settle_if_unsettled(key, State::Completed(value.clone())) {
            self.emit("deferred:completed", json!({ "key": key, "value": value }));
        }
    }

    /// Reject an externally-owned key. A no-op when already settled.
    pub fn reject(&self, key: &str, message: impl Into<String>) {
        let message = message.into();
        if self.settle_if_unsettled(key, State::Failed(message.clone())) {
            self.emit("deferred:failed", json!({ "key": key, "error": message }));
        }
    }

    pub fn status(&self, key: &str) -> Option<DeferredStatus> {
        let entries = self.entries.lock().expect("deferred lock poisoned");
        entries.get(key).map(Entry::status)
    }

    pub fn is_settled(&self, key: &str) -> bool {
        matches!(
            self.status(key),
            Some(DeferredStatus::Completed | DeferredStatus::Failed)
        )
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("deferred lock poisoned")
            .contains_key(key)
    }

    /// The completed value, if the key has completed.
    pub fn value(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock().expect("deferred lock poisoned");
        match entries.get(key) {
            Some(Entry {
                state: State::Completed(value),
                ..
            }) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .expect("deferred lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn entries(&self) -> Vec<(String, DeferredStatus)> {
        let mut all: Vec<(String, DeferredStatus)> = self
            .entries
            .lock()
            .expect("deferred lock poisoned")
            .iter()
            .map(|(k, e)| (k.clone(), e.status()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Forget the key entirely. Required before an executor can be retried
    /// after a failure. Pending waiters receive an error.
    pub fn clear(&self, key: &str) {
        self.entries
            .lock()
            .expect("deferred lock poisoned")
            .remove(key);
    }

    pub fn clear_all(&self) {
        self.entries
            .lock()
            .expect("deferred lock poisoned")
            .clear();
    }

    fn settle(&self, key: &str, state: State) {
        let mut entries = self.entries.lock().expect("deferred lock poisoned");
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(State::Pending));
        entry.state = state;
        let _ = entry.tx.send(());
    }

    fn settle_if_unsettled(&self, key: &str, state: State) -> bool {
        let mut entries = self.entries.lock().expect("deferred lock poisoned");
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(State::Pending));
        if matches!(entry.state, State::Completed(_) | State::Failed(_)) {
            return false;
        }
        entry.state = state;
        let _ = entry.tx.send(());
        true
    }

    fn emit(&self, name: &str, payload: Value) {
        if let Some(signals) = &self.signals {
            signals.emit(name, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SubscribeOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn wait_before_queue_resolves_with_executor_result() {
        let deferred = DeferredRegistry::new();

        let waiter = {
            let deferred = deferred.clone();
            tokio::spawn(async move { deferred.wait("x").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(deferred.status("x"), Some(DeferredStatus::Pending));

        let queued = deferred.queue("x", || async { Ok(json!(42)) }).await.unwrap();
        assert_eq!(queued, json!(42));

        let waited = waiter.await.unwrap().unwrap();
        assert_eq!(waited, json!(42));
        assert_eq!(deferred.status("x"), Some(DeferredStatus::Completed));
        assert_eq!(deferred.value("x"), Some(json!(42)));
    }

    #[tokio::test]
    async fn queue_is_at_most_once_per_key() {
        let deferred = DeferredRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            let result = deferred
                .queue("job", move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("done"))
                })
                .await
                .unwrap();
            assert_eq!(result, json!("done"));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_executor_rejects_waiters_until_clear() {
        let deferred = DeferredRegistry::new();

        let err = deferred
            .queue("bad", || async { Err("backend offline".into()) })
            .await
            .unwrap_err();
        assert_eq!(err.message, "backend offline");
        assert_eq!(deferred.status("bad"), Some(DeferredStatus::Failed));

        // Subsequent queue returns the failed state without running.
        let err = deferred
            .queue("bad", || async { Ok(json!("never")) })
            .await
            .unwrap_err();
        assert_eq!(err.message, "backend offline");

        deferred.clear("bad");
        let value = deferred
            .queue("bad", || async { Ok(json!("recovered")) })
            .await
            .unwrap();
        assert_eq!(value, json!("recovered"));
    }

    #[tokio::test]
    async fn external_resolve_fulfills_waiters() {
        let deferred = DeferredRegistry::new();
        let waiter = {
            let deferred = deferred.clone();
            tokio::spawn(async move { deferred.wait("auth:ready").await })
        };
        tokio::task::yield_now().await;

        deferred.resolve("auth:ready", json!({"user": "u1"}));
        let value = waiter.await.unwrap().unwrap();
        assert_eq!(value["user"], "u1");

        // Second resolve is a no-op.
        deferred.resolve("auth:ready", json!({"user": "u2"}));
        assert_eq!(deferred.value("auth:ready").unwrap()["user"], "u1");
    }

    #[tokio::test]
    async fn reject_propagates_to_waiters() {
        let deferred = DeferredRegistry::new();
        let waiter = {
            let deferred = deferred.clone();
            tokio::spawn(async move { deferred.wait("k").await })
        };
        tokio::task::yield_now().await;

        deferred.reject("k", "denied");
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.message, "denied");
        assert!(deferred.is_settled("k"));
    }

    #[tokio::test]
    async fn introspection_surface() {
        let deferred = DeferredRegistry::new();
        deferred.resolve("b", json!(2));
        deferred.reject("a", "no");

        assert!(deferred.has("a"));
        assert!(!deferred.has("c"));
        assert_eq!(deferred.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            deferred.entries(),
            vec![
                ("a".to_string(), DeferredStatus::Failed),
                ("b".to_string(), DeferredStatus::Completed),
            ]
        );

        deferred.clear_all();
        assert!(deferred.keys().is_empty());
    }

    #[tokio::test]
    async fn lifecycle_signals_are_emitted() {
        let bus = SignalBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.on(
            "deferred:*",
            move |event| s.lock().unwrap().push(event.name.clone()),
            SubscribeOptions::default(),
        );

        let deferred = DeferredRegistry::with_signals(bus);
        deferred
            .queue("ok", || async { Ok(json!(1)) })
            .await
            .unwrap();
        deferred
            .queue("bad", || async { Err("x".into()) })
            .await
            .unwrap_err();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "deferred:started",
                "deferred:completed",
                "deferred:started",
                "deferred:failed",
            ]
        );
    }
}

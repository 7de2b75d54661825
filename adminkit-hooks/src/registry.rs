//! The hook registration table and its two execution modes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use adminkit_utils::{execution_order, Registration, PRIORITY_NORMAL};
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::context::HookContext;
use crate::error::HookError;

type InvokeHandler =
    Arc<dyn for<'a> Fn(&'a mut HookContext) -> BoxFuture<'a, Result<(), HookError>> + Send + Sync>;
type AlterHandler = Arc<
    dyn for<'a> Fn(&'a Value, &'a HookContext) -> BoxFuture<'a, Result<Option<Value>, HookError>>
        + Send
        + Sync,
>;

enum HandlerKind {
    Invoke(InvokeHandler),
    Alter(AlterHandler),
}

/// Options for hook registration.
#[derive(Debug, Clone)]
pub struct HookOptions {
    /// Higher runs earlier. Defaults to [`PRIORITY_NORMAL`](crate::PRIORITY_NORMAL).
    pub priority: i32,
    /// Stable id referenced by other registrations' `after` lists.
    pub id: Option<String>,
    /// Ids of handlers that must run before this one.
    pub after: Vec<String>,
    /// Owning module, for bulk removal on module teardown.
    pub module: Option<String>,
    /// Remove after the first execution.
    pub once: bool,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self {
            priority: PRIORITY_NORMAL,
            id: None,
            after: Vec::new(),
            module: None,
            once: false,
        }
    }
}

impl HookOptions {
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

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

struct Entry {
    token: u64,
    priority: i32,
    id: Option<String>,
    after: Vec<String>,
    module: Option<String>,
    once: bool,
    kind: HandlerKind,
}

struct Inner {
    table: RwLock<HashMap<String, Vec<Entry>>>,
    next_seq: AtomicU64,
}

/// Handle for removing one registration.
pub struct HookHandle {
    inner: Weak<Inner>,
    name: String,
    token: u64,
}

impl HookHandle {
    pub fn remove(self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut table = inner.table.write().expect("hook table poisoned");
            if let Some(entries) = table.get_mut(&self.name) {
                entries.retain(|e| e.token != self.token);
                if entries.is_empty() {
                    table.remove(&self.name);
                }
            }
        }
    }
}

/// Priority- and dependency-ordered alter/invoke pipeline.
///
/// `HookRegistry` is `Clone` and can be shared across threads.
#[derive(Clone)]
pub struct HookRegistry {
    inner: Arc<Inner>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                table: RwLock::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Register a lifecycle handler for `invoke(name, ..)`.
    pub fn on_invoke<F>(&self, name: &str, handler: F, options: HookOptions) -> HookHandle
    where
        F: for<'a> Fn(&'a mut HookContext) -> BoxFuture<'a, Result<(), HookError>>
            + Send
            + Sync
            + 'static,
    {
        self.insert(name, options, HandlerKind::Invoke(Arc::new(handler)))
    }

    /// Register a pipeline handler for `alter(name, ..)`.
    ///
    /// Returning `Ok(None)` keeps the current data unchanged.
    pub fn on_alter<F>(&self, name: &str, handler: F, options: HookOptions) -> HookHandle
    where
        F: for<'a> Fn(&'a Value, &'a HookContext) -> BoxFuture<'a, Result<Option<Value>, HookError>>
            + Send
            + Sync
            + 'static,
    {
        self.insert(name, options, HandlerKind::Alter(Arc::new(handler)))
    }

    /// Run the lifecycle handlers of `name` in order.
    ///
    /// The first handler error aborts the chain and is returned. A handler
    /// calling [`HookContext::stop_propagation`] ends the chain cleanly.
    pub async fn invoke(&self, name: &str, ctx: &mut HookContext) -> Result<(), HookError> {
        let handlers = self.snapshot(name, true);
        let mut ran = Vec::new();
        let mut outcome = Ok(());
        for (token, handler) in &handlers {
            let HandlerKind::Invoke(handler) = &**handler else {
                continue;
            };
            ran.push(*token);
            if let Err(err) = handler(ctx).await {
                outcome = Err(err);
                break;
            }
            if ctx.is_propagation_stopped() {
                break;
            }
        }
        self.remove_spent(name, &ran);
        outcome
    }

    /// Run the pipeline handlers of `name` over `data`, in order.
    pub async fn alter(&self, name: &str, data: Value) -> Result<Value, HookError> {
        self.alter_with(name, data, &HookContext::default()).await
    }

    /// [`alter`](Self::alter) with an explicit context visible to handlers.
    pub async fn alter_with(
        &self,
        name: &str,
        data: Value,
        ctx: &HookContext,
    ) -> Result<Value, HookError> {
        let handlers = self.snapshot(name, false);
        let mut current = data;
        let mut ran = Vec::new();
        let mut outcome = Ok(());
        for (token, handler) in &handlers {
            let HandlerKind::Alter(handler) = &**handler else {
                continue;
            };
            ran.push(*token);
            match handler(&current, ctx).await {
                Ok(Some(next)) => current = next,
                Ok(None) => {}
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        self.remove_spent(name, &ran);
        outcome.map(|_| current)
    }

    /// Remove every handler registered under `name`.
    pub fn off(&self, name: &str) {
        self.inner
            .table
            .write()
            .expect("hook table poisoned")
            .remove(name);
    }

    /// Remove every handler registered with the given module tag.
    pub fn off_module(&self, module: &str) {
        let mut table = self.inner.table.write().expect("hook table poisoned");
        table.retain(|_, entries| {
            entries.retain(|e| e.module.as_deref() != Some(module));
            !entries.is_empty()
        });
    }

    pub fn has(&self, name: &str) -> bool {
        self.handler_count(name) > 0
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.inner
            .table
            .read()
            .expect("hook table poisoned")
            .get(name)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    fn insert(&self, name: &str, options: HookOptions, kind: HandlerKind) -> HookHandle {
        let token = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            token,
            priority: options.priority,
            id: options.id,
            after: options.after,
            module: options.module,
            once: options.once,
            kind,
        };
        self.inner
            .table
            .write()
            .expect("hook table poisoned")
            .entry(name.to_string())
            .or_default()
            .push(entry);
        HookHandle {
            inner: Arc::downgrade(&self.inner),
            name: name.to_string(),
            token,
        }
    }

    /// Ordered snapshot of one mode's handlers for `name`.
    fn snapshot(&self, name: &str, invoke_mode: bool) -> Vec<(u64, Arc<HandlerKind>)> {
        let table = self.inner.table.read().expect("hook table poisoned");
        let Some(entries) = table.get(name) else {
            return Vec::new();
        };
        let mut regs = Vec::new();
        let mut handlers = Vec::new();
        for entry in entries {
            let matches_mode = matches!(
                (&entry.kind, invoke_mode),
                (HandlerKind::Invoke(_), true) | (HandlerKind::Alter(_), false)
            );
            if !matches_mode {
                continue;
            }
            regs.push(Registration {
                id: entry.id.clone(),
                priority: entry.priority,
                after: entry.after.clone(),
                seq: entry.token,
            });
            handlers.push((
                entry.token,
                Arc::new(match &entry.kind {
                    HandlerKind::Invoke(h) => HandlerKind::Invoke(h.clone()),
                    HandlerKind::Alter(h) => HandlerKind::Alter(h.clone()),
                }),
            ));
        }
        drop(table);

        execution_order(&regs)
            .into_iter()
            .map(|i| (handlers[i].0, handlers[i].1.clone()))
            .collect()
    }

    /// Drop `once` registrations that just ran.
    fn remove_spent(&self, name: &str, ran: &[u64]) {
        if ran.is_empty() {
            return;
        }
        let mut table = self.inner.table.write().expect("hook table poisoned");
        if let Some(entries) = table.get_mut(name) {
            entries.retain(|e| !(e.once && ran.contains(&e.token)));
            if entries.is_empty() {
                table.remove(name);
            }
        }
    }
}

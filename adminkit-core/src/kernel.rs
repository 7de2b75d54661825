//! Kernel boot sequence and session signal plumbing.

use std::sync::Arc;

use adminkit_hooks::HookRegistry;
use adminkit_security::{EntityAuth, SessionAuth};
use adminkit_signals::{
    DeferredRegistry, EventRouter, EventRouterConfig, RouterError, SignalBus, SignalSubscription,
    SubscribeOptions,
};
use adminkit_storage::{StorageError, StorageResolver};
use adminkit_zones::ZoneRegistry;
use serde_json::{json, Value};

use crate::manager::{EntityManager, Services};
use crate::module::{Module, ModuleContext, NavSection, RouteDecl};
use crate::orchestrator::Orchestrator;

/// Boot failures.
#[derive(Debug)]
pub enum KernelError {
    /// The event routing graph has a cycle.
    Router(RouterError),
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::Router(err) => write!(f, "event router: {err}"),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<RouterError> for KernelError {
    fn from(err: RouterError) -> Self {
        KernelError::Router(err)
    }
}

/// Builder collecting modules and collaborators before boot.
pub struct KernelBuilder {
    modules: Vec<Box<dyn Module>>,
    session: Option<Arc<dyn SessionAuth>>,
    entity_auth: Option<Arc<dyn EntityAuth>>,
    resolver: StorageResolver,
    event_routes: EventRouterConfig,
    warmup: bool,
    debug: bool,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            session: None,
            entity_auth: None,
            resolver: StorageResolver::new(),
            event_routes: EventRouterConfig::new(),
            warmup: true,
            debug: false,
        }
    }
}

impl KernelBuilder {
    pub fn with_module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn with_session(mut self, session: Arc<dyn SessionAuth>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_entity_auth(mut self, auth: Arc<dyn EntityAuth>) -> Self {
        self.entity_auth = Some(auth);
        self
    }

    pub fn with_resolver(mut self, resolver: StorageResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_event_routes(mut self, config: EventRouterConfig) -> Self {
        self.event_routes = config;
        self
    }

    /// Skip boot-time cache warmups.
    pub fn without_warmup(mut self) -> Self {
        self.warmup = false;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Boot: construct the registries, wire auth signals, load modules in
    /// order, build the event router, and fire warmups.
    ///
    /// Must run inside an async runtime when warmups are enabled (they are
    /// spawned fire-and-forget).
    pub fn build(self) -> Result<Kernel, KernelError> {
        let signals = SignalBus::new();
        let deferred = DeferredRegistry::with_signals(signals.clone());
        let hooks = HookRegistry::new();
        let zones = ZoneRegistry::with_debug(self.debug);

        let mut services = Services::new(signals.clone(), hooks.clone(), deferred.clone());
        if let Some(auth) = &self.entity_auth {
            services = services.with_auth(auth.clone());
        }
        let orchestrator = Orchestrator::new(services, self.resolver);

        let mut session_subs = Vec::new();
        if let Some(session) = &self.session {
            session_subs.extend(session.connect_signals(&signals));

            // `auth:ready` is fulfilled by the first `auth:login`.
            let ready = deferred.clone();
            session_subs.push(signals.on(
                "auth:login",
                move |event| ready.resolve("auth:ready", event.payload.clone()),
                SubscribeOptions::default().with_id("kernel:auth-ready"),
            ));

            // Default expiry handling: drop caches, end the session, and
            // announce the logout. Login failures never land here.
            let expired_session = session.clone();
            let expired_signals = signals.clone();
            let expired_orchestrator = Arc::downgrade(&orchestrator);
            session_subs.push(signals.on(
                "auth:expired",
                move |_event| {
                    if let Some(orchestrator) = expired_orchestrator.upgrade() {
                        orchestrator.invalidate_all();
                    }
                    let session = expired_session.clone();
                    let signals = expired_signals.clone();
                    tokio::spawn(async move {
                        session.logout().await;
                        signals.emit("auth:logout", json!({}));
                    });
                },
                SubscribeOptions::default().with_id("kernel:expired"),
            ));

            // Impersonation changes the principal; every cache is stale.
            for signal in ["auth:impersonate", "auth:impersonate:stop"] {
                let weak = Arc::downgrade(&orchestrator);
                session_subs.push(signals.on(
                    signal,
                    move |_event| {
                        if let Some(orchestrator) = weak.upgrade() {
                            orchestrator.invalidate_all();
                        }
                    },
                    SubscribeOptions::default().with_id(format!("kernel:{signal}")),
                ));
            }
        }

        let mut routes = Vec::new();
        let mut nav = Vec::new();
        for module in &self.modules {
            let mut ctx = ModuleContext::new(module.name(), &signals, &hooks, &zones);
            module.connect(&mut ctx);
            for (name, registration) in ctx.entities {
                orchestrator.declare(name, registration);
            }
            routes.extend(ctx.routes);
            nav.extend(ctx.nav);
            tracing::debug!(module = module.name(), "module connected");
        }

        let router = if self.event_routes.is_empty() {
            None
        } else {
            Some(EventRouter::connect(self.event_routes, &signals)?)
        };

        if self.warmup {
            orchestrator.fire_warmups();
        }

        Ok(Kernel {
            signals,
            hooks,
            zones,
            deferred,
            orchestrator,
            session: self.session,
            router,
            routes,
            nav,
            _session_subs: session_subs,
        })
    }
}

/// The booted kernel: owns the registries and the session plumbing.
pub struct Kernel {
    signals: SignalBus,
    hooks: HookRegistry,
    zones: ZoneRegistry,
    deferred: DeferredRegistry,
    orchestrator: Arc<Orchestrator>,
    session: Option<Arc<dyn SessionAuth>>,
    router: Option<EventRouter>,
    routes: Vec<RouteDecl>,
    nav: Vec<NavSection>,
    _session_subs: Vec<SignalSubscription>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").finish_non_exhaustive()
    }
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    pub fn deferred(&self) -> &DeferredRegistry {
        &self.deferred
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn event_router(&self) -> Option<&EventRouter> {
        self.router.as_ref()
    }

    pub fn routes(&self) -> &[RouteDecl] {
        &self.routes
    }

    /// Resolve an entity manager.
    pub async fn entity(&self, name: &str) -> Result<Arc<EntityManager>, StorageError> {
        self.orchestrator.get(name).await
    }

    /// Navigation sections after `menu:alter` hooks.
    pub async fn nav(&self) -> Vec<NavSection> {
        let raw = serde_json::to_value(&self.nav).unwrap_or_else(|_| json!([]));
        match self.hooks.alter("menu:alter", raw).await {
            Ok(altered) => serde_json::from_value(altered).unwrap_or_else(|err| {
                tracing::warn!(%err, "menu:alter produced an unreadable menu; using original");
                self.nav.clone()
            }),
            Err(err) => {
                tracing::warn!(%err, "menu:alter failed; using original menu");
                self.nav.clone()
            }
        }
    }

    /// Log in through the session adapter.
    ///
    /// Success emits `auth:login` (which also fulfills the `auth:ready`
    /// deferred); failure emits `auth:login:error` and never `auth:expired`.
    pub async fn login(&self, credentials: Value) -> Result<Value, StorageError> {
        let session = self.session()?;
        match session.login(credentials).await {
            Ok(outcome) => {
                self.signals
                    .emit("auth:login", json!({ "user": outcome.get("user") }));
                Ok(outcome)
            }
            Err(err) => {
                self.signals
                    .emit("auth:login:error", json!({ "error": err.to_string() }));
                Err(StorageError::Unauthorized(err.to_string()))
            }
        }
    }

    pub async fn logout(&self) -> Result<(), StorageError> {
        let session = self.session()?;
        session.logout().await;
        self.orchestrator.invalidate_all();
        self.signals.emit("auth:logout", json!({}));
        Ok(())
    }

    pub async fn impersonate(&self, target: Value) -> Result<(), StorageError> {
        let session = self.session()?;
        let original = session.user();
        session
            .impersonate(target.clone())
            .await
            .map_err(|err| StorageError::Unauthorized(err.to_string()))?;
        self.signals.emit(
            "auth:impersonate",
            json!({ "target": target, "original": original }),
        );
        Ok(())
    }

    pub async fn stop_impersonating(&self) -> Result<(), StorageError> {
        let session = self.session()?;
        session
            .stop_impersonating()
            .await
            .map_err(|err| StorageError::Unauthorized(err.to_string()))?;
        self.signals
            .emit("auth:impersonate:stop", json!({ "user": session.user() }));
        Ok(())
    }

    /// Tear down: dispose managers and detach the event router.
    pub fn dispose(mut self) {
        self.orchestrator.dispose();
        if let Some(router) = self.router.take() {
            router.disconnect();
        }
    }

    fn session(&self) -> Result<&Arc<dyn SessionAuth>, StorageError> {
        self.session
            .as_ref()
            .ok_or_else(|| StorageError::Unauthorized("no session adapter configured".into()))
    }
}

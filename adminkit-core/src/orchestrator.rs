//! Lazy registry of entity managers and cross-cutting service injector.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use adminkit_signals::{SignalSubscription, SubscribeOptions};
use adminkit_storage::{storage_factory, StorageConfig, StorageError, StorageResolver};

use crate::entity::EntityDef;
use crate::manager::{EntityManager, Services};

/// What a module hands the orchestrator for one entity: a ready manager,
/// or a definition plus storage config for the factory.
pub enum EntityRegistration {
    Manager(Arc<EntityManager>),
    Config {
        def: EntityDef,
        storage: StorageConfig,
    },
}

type EntityFactory =
    Arc<dyn Fn(EntityDef, StorageConfig) -> Result<EntityManager, StorageError> + Send + Sync>;

/// Central lazy registry of managers.
///
/// Managers are created on first [`get`](Orchestrator::get) and retained
/// for the orchestrator's lifetime. On registration each manager receives
/// the shared services (signals, hooks, entity auth, deferreds) and a weak
/// back-reference. The orchestrator also binds
/// `cache:entity:invalidate:<name>` to the matching manager's cache.
pub struct Orchestrator {
    services: Services,
    managers: RwLock<HashMap<String, Arc<EntityManager>>>,
    pending: Mutex<HashMap<String, EntityRegistration>>,
    factory: RwLock<EntityFactory>,
    subscriptions: Mutex<Vec<SignalSubscription>>,
    self_ref: OnceLock<Weak<Orchestrator>>,
}

impl Orchestrator {
    pub fn new(services: Services, resolver: StorageResolver) -> Arc<Self> {
        let default_factory: EntityFactory = Arc::new(move |def: EntityDef, config| {
            let storage = storage_factory(config, &def.name, &resolver)?;
            Ok(EntityManager::new(def, storage))
        });

        let orchestrator = Arc::new(Self {
            services,
            managers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            factory: RwLock::new(default_factory),
            subscriptions: Mutex::new(Vec::new()),
            self_ref: OnceLock::new(),
        });
        let _ = orchestrator.self_ref.set(Arc::downgrade(&orchestrator));

        let weak = Arc::downgrade(&orchestrator);
        let subscription = orchestrator.services.signals.on(
            "cache:entity:invalidate:*",
            move |event| {
                let Some(orchestrator) = weak.upgrade() else {
                    return;
                };
                let name = event
                    .name
                    .trim_start_matches("cache:entity:invalidate:")
                    .to_string();
                let managers = orchestrator
                    .managers
                    .read()
                    .expect("orchestrator lock poisoned");
                if let Some(manager) = managers.get(&name) {
                    manager.invalidate_cache();
                }
            },
            SubscribeOptions::default().with_id("orchestrator:cache-invalidate"),
        );
        orchestrator
            .subscriptions
            .lock()
            .expect("orchestrator lock poisoned")
            .push(subscription);

        orchestrator
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Replace the entity factory used for lazily-declared configs.
    pub fn set_factory<F>(&self, factory: F)
    where
        F: Fn(EntityDef, StorageConfig) -> Result<EntityManager, StorageError>
            + Send
            + Sync
            + 'static,
    {
        *self.factory.write().expect("orchestrator lock poisoned") = Arc::new(factory);
    }

    /// Record a module-declared entity for lazy creation.
    pub fn declare(&self, name: impl Into<String>, registration: EntityRegistration) {
        let name = name.into();
        let mut pending = self.pending.lock().expect("orchestrator lock poisoned");
        if pending.contains_key(&name)
            || self
                .managers
                .read()
                .expect("orchestrator lock poisoned")
                .contains_key(&name)
        {
            tracing::warn!(entity = %name, "entity declared twice; later declaration wins");
        }
        pending.insert(name, registration);
    }

    /// Install a ready manager immediately.
    pub fn register(&self, name: impl Into<String>, manager: Arc<EntityManager>) {
        let name = name.into();
        self.install(&name, manager);
    }

    /// Resolve (lazily creating) the named manager.
    pub async fn get(&self, name: &str) -> Result<Arc<EntityManager>, StorageError> {
        if let Some(manager) = self
            .managers
            .read()
            .expect("orchestrator lock poisoned")
            .get(name)
        {
            return Ok(manager.clone());
        }

        let registration = self
            .pending
            .lock()
            .expect("orchestrator lock poisoned")
            .remove(name);
        match registration {
            Some(EntityRegistration::Manager(manager)) => {
                self.install(name, manager.clone());
                Ok(manager)
            }
            Some(EntityRegistration::Config { def, storage }) => {
                let factory = self
                    .factory
                    .read()
                    .expect("orchestrator lock poisoned")
                    .clone();
                let manager = Arc::new(factory(def, storage)?);
                self.install(name, manager.clone());
                Ok(manager)
            }
            None => Err(StorageError::NotFound(format!(
                "no entity '{name}' registered"
            ))),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.managers
            .read()
            .expect("orchestrator lock poisoned")
            .contains_key(name)
            || self
                .pending
                .lock()
                .expect("orchestrator lock poisoned")
                .contains_key(name)
    }

    /// Names of every registered or declared entity, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .managers
            .read()
            .expect("orchestrator lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.extend(
            self.pending
                .lock()
                .expect("orchestrator lock poisoned")
                .keys()
                .cloned(),
        );
        names.sort();
        names.dedup();
        names
    }

    /// Instantiate every declared entity, then kick off each manager's
    /// fire-and-forget warmup.
    pub fn fire_warmups(&self) {
        let pending: Vec<String> = self
            .pending
            .lock()
            .expect("orchestrator lock poisoned")
            .keys()
            .cloned()
            .collect();
        for name in pending {
            if let Err(err) = self.instantiate(&name) {
                tracing::warn!(entity = %name, %err, "skipping warmup; manager construction failed");
            }
        }
        let managers: Vec<Arc<EntityManager>> = self
            .managers
            .read()
            .expect("orchestrator lock poisoned")
            .values()
            .cloned()
            .collect();
        for manager in managers {
            manager.warmup();
        }
    }

    /// Drop every manager's cache (e.g. on impersonation or logout).
    pub fn invalidate_all(&self) {
        let managers = self.managers.read().expect("orchestrator lock poisoned");
        for manager in managers.values() {
            manager.invalidate_cache();
        }
    }

    /// Release all managers and detach the invalidation binding.
    pub fn dispose(&self) {
        self.managers
            .write()
            .expect("orchestrator lock poisoned")
            .clear();
        self.pending
            .lock()
            .expect("orchestrator lock poisoned")
            .clear();
        for subscription in self
            .subscriptions
            .lock()
            .expect("orchestrator lock poisoned")
            .drain(..)
        {
            subscription.unsubscribe();
        }
    }

    fn instantiate(&self, name: &str) -> Result<Arc<EntityManager>, StorageError> {
        let registration = self
            .pending
            .lock()
            .expect("orchestrator lock poisoned")
            .remove(name);
        match registration {
            Some(EntityRegistration::Manager(manager)) => {
                self.install(name, manager.clone());
                Ok(manager)
            }
            Some(EntityRegistration::Config { def, storage }) => {
                let factory = self
                    .factory
                    .read()
                    .expect("orchestrator lock poisoned")
                    .clone();
                let manager = Arc::new(factory(def, storage)?);
                self.install(name, manager.clone());
                Ok(manager)
            }
            None => Err(StorageError::NotFound(format!(
                "no entity '{name}' registered"
            ))),
        }
    }

    fn install(&self, name: &str, manager: Arc<EntityManager>) {
        let weak = self
            .self_ref
            .get()
            .cloned()
            .unwrap_or_else(Weak::new);
        manager.on_register(self.services.clone(), weak);
        let mut managers = self.managers.write().expect("orchestrator lock poisoned");
        if managers.insert(name.to_string(), manager).is_some() {
            tracing::warn!(entity = name, "manager re-registered; replacing previous instance");
        }
    }
}

//! Explicit module registration.
//!
//! Modules are passed to the kernel builder in load order (no file-glob
//! discovery); each declares its entities, blocks, hooks, signals, and
//! navigation through the [`ModuleContext`] it receives in `connect`.

use std::sync::Arc;

use adminkit_hooks::HookRegistry;
use adminkit_signals::SignalBus;
use adminkit_storage::StorageConfig;
use adminkit_zones::{BlockDef, ZoneError, ZoneRegistry};
use serde::{Deserialize, Serialize};

use crate::entity::EntityDef;
use crate::manager::EntityManager;
use crate::orchestrator::EntityRegistration;

/// One navigation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavItem {
    pub label: String,
    pub route: String,
}

/// A titled group of navigation entries, weight-ordered by the host UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavSection {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub items: Vec<NavItem>,
}

/// A declared route shape. The core records these for UI collaborators
/// and never interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecl {
    pub path: String,
    pub page: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

/// A composable unit of functionality loaded by the kernel.
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Register the module's contributions.
    fn connect(&self, ctx: &mut ModuleContext<'_>);
}

/// Registration surface handed to each module during boot.
pub struct ModuleContext<'a> {
    module: String,
    signals: &'a SignalBus,
    hooks: &'a HookRegistry,
    zones: &'a ZoneRegistry,
    pub(crate) entities: Vec<(String, EntityRegistration)>,
    pub(crate) nav: Vec<NavSection>,
    pub(crate) routes: Vec<RouteDecl>,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(
        module: &str,
        signals: &'a SignalBus,
        hooks: &'a HookRegistry,
        zones: &'a ZoneRegistry,
    ) -> Self {
        Self {
            module: module.to_string(),
            signals,
            hooks,
            zones,
            entities: Vec::new(),
            nav: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// Declare an entity from a definition and a storage config.
    pub fn entity(
        &mut self,
        name: impl Into<String>,
        def: EntityDef,
        storage: impl Into<StorageConfig>,
    ) {
        self.entities.push((
            name.into(),
            EntityRegistration::Config {
                def,
                storage: storage.into(),
            },
        ));
    }

    /// Declare an entity from an already-built manager.
    pub fn entity_manager(&mut self, name: impl Into<String>, manager: Arc<EntityManager>) {
        self.entities
            .push((name.into(), EntityRegistration::Manager(manager)));
    }

    /// Define a zone (optionally with a fallback component).
    pub fn zone(&mut self, name: &str, default_component: Option<&str>) {
        self.zones.define_zone(name, default_component);
    }

    /// Register a block into a zone.
    pub fn block(&mut self, zone: &str, block: BlockDef) -> Result<(), ZoneError> {
        self.zones.register_block(zone, block)
    }

    pub fn signals(&self) -> &SignalBus {
        self.signals
    }

    pub fn hooks(&self) -> &HookRegistry {
        self.hooks
    }

    /// Contribute a navigation section (host UI renders it after
    /// `menu:alter` hooks run).
    pub fn nav(&mut self, section: NavSection) {
        self.nav.push(section);
    }

    /// Record route declarations under a common prefix.
    pub fn routes(&mut self, prefix: &str, routes: Vec<RouteDecl>) {
        let prefix = prefix.trim_end_matches('/');
        for mut route in routes {
            route.path = format!("{prefix}/{}", route.path.trim_start_matches('/'));
            self.routes.push(route);
        }
    }

    /// Record the conventional CRUD route set for an entity.
    pub fn crud(&mut self, path: &str, entity: &str) {
        let path = path.trim_end_matches('/');
        for (suffix, page) in [("", "list"), ("/new", "form"), ("/:id", "form")] {
            self.routes.push(RouteDecl {
                path: format!("{path}{suffix}"),
                page: page.to_string(),
                entity: Some(entity.to_string()),
            });
        }
    }
}

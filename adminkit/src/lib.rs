//! # adminkit — the admin-panel framework core
//!
//! Umbrella crate re-exporting the full public surface:
//!
//! | Crate | Contents |
//! |-------|----------|
//! | [`core`] | Entity definitions, managers, orchestrator, kernel |
//! | [`storage`] | Storage contract, adapters, factory |
//! | [`signals`] | Signal bus, deferred registry, event router |
//! | [`hooks`] | Invoke/alter hook registry |
//! | [`zones`] | Zone registry and block composition |
//! | [`security`] | Permission keys, role graph, auth adapter seams |
//!
//! Most applications depend on this crate alone and use the [`prelude`].

pub use adminkit_core as core;
pub use adminkit_hooks as hooks;
pub use adminkit_security as security;
pub use adminkit_signals as signals;
pub use adminkit_storage as storage;
pub use adminkit_utils as utils;
pub use adminkit_zones as zones;

pub use adminkit_core::{
    EntityDef, EntityManager, FieldDef, Kernel, KernelBuilder, Module, ModuleContext,
    Orchestrator, QueryOptions, RequestContext,
};
pub use adminkit_storage::{ListParams, Record, Storage, StorageConfig, StorageError};

pub mod prelude {
    //! Re-exports of the most commonly used adminkit types.
    pub use adminkit_core::prelude::*;
    pub use adminkit_hooks::prelude::*;
    pub use adminkit_security::prelude::*;
    pub use adminkit_signals::prelude::*;
    pub use adminkit_storage::prelude::*;
    pub use adminkit_zones::prelude::*;
}

//! # adminkit-core — entity managers, orchestrator, and the kernel
//!
//! The data-and-extensibility core of the adminkit framework: declarative
//! entity definitions become managers with consistent
//! list/get/create/update/delete semantics, permission checks, an
//! opportunistic cache, hook and signal emissions, and context-dependent
//! storage routing — independent of where the data lives.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EntityDef`] / [`FieldDef`] | Declarative schema: fields, relations, policy knobs |
//! | [`EntityManager`] | Per-entity CRUD façade (permissions + cache + hooks + signals) |
//! | [`Orchestrator`] | Lazy registry of managers, cache-invalidation wiring |
//! | [`Module`] / [`ModuleContext`] | Explicit registration units loaded at boot |
//! | [`Kernel`] / [`KernelBuilder`] | Boot sequence and dependency wiring |
//!
//! # Example
//!
//! ```ignore
//! use adminkit_core::{EntityDef, FieldDef, Kernel, Module, ModuleContext};
//!
//! struct Library;
//!
//! impl Module for Library {
//!     fn name(&self) -> &str { "library" }
//!     fn connect(&self, ctx: &mut ModuleContext<'_>) {
//!         ctx.entity(
//!             "books",
//!             EntityDef::new("books")
//!                 .with_label_field("title")
//!                 .with_field("title", FieldDef::string().required())
//!                 .with_threshold(100),
//!             "mock:books",
//!         );
//!         ctx.crud("/books", "books");
//!     }
//! }
//!
//! let kernel = Kernel::builder().with_module(Library).build()?;
//! let books = kernel.entity("books").await?;
//! let page = books.list(&Default::default(), None).await?;
//! ```

pub mod client;
pub mod context;
pub mod entity;
pub mod kernel;
pub mod manager;
pub mod module;
pub mod orchestrator;

pub use client::ExpiryAwareClient;
pub use context::{ParentRef, RequestContext};
pub use entity::{ChildDef, EntityDef, FieldDef, FieldDefault, ParentDef};
pub use kernel::{Kernel, KernelBuilder, KernelError};
pub use manager::{
    AccessOverrides, EntityManager, QueryOptions, QueryResult, Services, StorageRoute,
};
pub use module::{Module, ModuleContext, NavItem, NavSection, RouteDecl};
pub use orchestrator::{EntityRegistration, Orchestrator};

pub mod prelude {
    //! Re-exports of the most commonly used core types.
    pub use crate::{
        EntityDef, EntityManager, FieldDef, Kernel, Module, ModuleContext, Orchestrator,
        QueryOptions, RequestContext,
    };
}

//! # adminkit-security — permissions, roles, and auth adapter seams
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PermissionKey`] | Parsed colon-delimited key (`entity:books:delete`) |
//! | [`PermissionSet`] | Compiled grant patterns with wildcard matching |
//! | [`RoleGraph`] | DAG of roles with transitive permission inheritance |
//! | [`SessionAuth`] | Session adapter contract (login/logout/impersonation) |
//! | [`EntityAuth`] | Entity-level grant check consumed by managers |
//! | [`RoleEntityAuth`] | Stock `EntityAuth` over a role graph + session |
//!
//! ## Wildcard grammar
//!
//! A grant pattern segment `*` matches exactly one query segment; a
//! *trailing* `*` matches one or more remaining segments; the pattern `*`
//! alone matches every key. Keys are case-sensitive and segments match
//! `[a-z0-9_-]+`.

pub mod adapter;
pub mod error;
pub mod permission;
pub mod roles;

pub use adapter::{EntityAuth, MemorySession, RoleEntityAuth, SessionAuth};
pub use error::SecurityError;
pub use permission::{PermissionKey, PermissionSet};
pub use roles::RoleGraph;

pub mod prelude {
    //! Re-exports of the most commonly used security types.
    pub use crate::{EntityAuth, PermissionSet, RoleEntityAuth, RoleGraph, SessionAuth};
}

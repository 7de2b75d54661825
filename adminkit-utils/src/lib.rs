//! # adminkit-utils — shared helpers for the adminkit workspace
//!
//! Currently this crate holds one thing: the deterministic handler-ordering
//! algorithm used by both the signal bus and the hook registry, so the two
//! subsystems cannot drift apart on ordering semantics.

pub mod ordering;

pub use ordering::{
    execution_order, Registration, PRIORITY_FIRST, PRIORITY_HIGH, PRIORITY_LAST, PRIORITY_LOW,
    PRIORITY_NORMAL,
};

pub mod prelude {
    //! Re-exports of the most commonly used helpers.
    pub use crate::ordering::{execution_order, Registration};
}

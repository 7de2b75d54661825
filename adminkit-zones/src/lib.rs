//! # adminkit-zones — named UI slots populated by ordered blocks
//!
//! A zone is a named slot a host UI renders; blocks are component
//! descriptors registered into zones by modules. The registry never
//! renders anything — it resolves registrations (add / replace / extend /
//! wrap) into a deterministic, weight-ordered effective list that a view
//! layer consumes. Every mutation bumps a version counter so reactive
//! consumers can cheaply observe change.

pub mod block;
pub mod registry;

pub use block::{BlockDef, BlockOperation, ResolvedBlock, Wrapper};
pub use registry::{ZoneError, ZoneRegistry};

pub mod prelude {
    //! Re-exports of the most commonly used zone types.
    pub use crate::{BlockDef, BlockOperation, ZoneRegistry};
}

//! # adminkit-hooks — ordered extension points
//!
//! A [`HookRegistry`] holds named extension points with two interaction
//! modes over one registration table:
//!
//! - **invoke** — lifecycle: handlers run in order for side effects and may
//!   fail to abort the chain. The [`HookContext`] carries the payload plus
//!   `prevent_default` / `stop_propagation` flags.
//! - **alter** — pipeline: each handler sees the current data and may return
//!   a replacement; `None` means "no change".
//!
//! Handler order is deterministic: priority first, then `after`
//! constraints, then registration order — the same composite the signal bus
//! uses (shared via `adminkit-utils`).

pub mod context;
pub mod error;
pub mod registry;

pub use context::HookContext;
pub use error::HookError;
pub use registry::{HookHandle, HookOptions, HookRegistry};

pub use adminkit_utils::{
    PRIORITY_FIRST, PRIORITY_HIGH, PRIORITY_LAST, PRIORITY_LOW, PRIORITY_NORMAL,
};

pub mod prelude {
    //! Re-exports of the most commonly used hook types.
    pub use crate::{HookContext, HookError, HookOptions, HookRegistry};
}

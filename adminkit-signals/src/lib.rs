//! # adminkit-signals — wildcard pub/sub, deferreds, and static routing
//!
//! Three boot-time coordination primitives for the adminkit core:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SignalBus`] | Pub/sub keyed by colon-delimited names with wildcard patterns (`books:*`, `*:created`, `**`) and deterministic handler ordering |
//! | [`DeferredRegistry`] | Keyed promises resolvable before or after their producer registers (`wait` before `queue` still resolves) |
//! | [`EventRouter`] | Static signal-to-signal routing declared at boot; cycles fail at construction |
//!
//! Handler ordering (priority, then `after` constraints, then registration
//! order) is shared with the hook registry via `adminkit-utils`.
//!
//! # Example
//!
//! ```ignore
//! use adminkit_signals::{SignalBus, SubscribeOptions};
//! use serde_json::json;
//!
//! let bus = SignalBus::new();
//! bus.on("books:*", |event| println!("{}", event.name), SubscribeOptions::default());
//! bus.emit_entity("books", "created", json!({"id": "1"}));
//! ```

pub mod bus;
pub mod deferred;
pub mod error;
pub mod pattern;
pub mod router;

pub use bus::{SignalBus, SignalEvent, SignalSubscription, SubscribeOptions, HANDLER_ERROR_SIGNAL};
pub use deferred::{DeferredRegistry, DeferredStatus};
pub use error::{DeferredError, RouterError, SignalError};
pub use pattern::SignalPattern;
pub use router::{Destination, EventRouter, EventRouterConfig};

pub use adminkit_utils::{
    PRIORITY_FIRST, PRIORITY_HIGH, PRIORITY_LAST, PRIORITY_LOW, PRIORITY_NORMAL,
};

pub mod prelude {
    //! Re-exports of the most commonly used signal types.
    pub use crate::{
        DeferredRegistry, Destination, EventRouter, EventRouterConfig, SignalBus, SignalEvent,
        SubscribeOptions,
    };
}

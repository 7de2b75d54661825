use std::time::Duration;

/// Errors surfaced by [`SignalBus::once`](crate::SignalBus::once).
#[derive(Debug)]
pub enum SignalError {
    /// The timeout elapsed before a matching signal was emitted.
    Timeout { signal: String, waited: Duration },
    /// The subscription was removed before a matching signal arrived.
    Closed(String),
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalError::Timeout { signal, waited } => {
                write!(f, "timed out after {waited:?} waiting for signal '{signal}'")
            }
            SignalError::Closed(signal) => {
                write!(f, "subscription for '{signal}' was removed while waiting")
            }
        }
    }
}

impl std::error::Error for SignalError {}

/// Failure of a deferred key, delivered to every waiter.
#[derive(Debug, Clone)]
pub struct DeferredError {
    pub key: String,
    pub message: String,
}

impl DeferredError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DeferredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deferred '{}' failed: {}", self.key, self.message)
    }
}

impl std::error::Error for DeferredError {}

/// Errors raised while building an [`EventRouter`](crate::EventRouter).
#[derive(Debug)]
pub enum RouterError {
    /// The destination graph contains a cycle; routing would never terminate.
    Cycle { cycle: Vec<String> },
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::Cycle { cycle } => {
                write!(f, "cycle in event routing graph: {}", cycle.join(" -> "))
            }
        }
    }
}

impl std::error::Error for RouterError {}

//! Auth adapter contracts and the stock role-based entity auth.
//!
//! Two logically separate seams: [`SessionAuth`] owns the session
//! (login/logout/impersonation) and is supplied by the host application;
//! [`EntityAuth`] answers grant checks and is what entity managers consume.

use std::sync::{Arc, RwLock};

use adminkit_signals::{SignalBus, SignalSubscription, SubscribeOptions};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::SecurityError;
use crate::permission::PermissionSet;
use crate::roles::RoleGraph;

/// Session adapter contract.
///
/// `login` resolves to `{ token, user }`. Implementations that do not
/// support impersonation keep the default `Unsupported` behavior.
#[async_trait]
pub trait SessionAuth: Send + Sync {
    async fn login(&self, credentials: Value) -> Result<Value, SecurityError>;

    async fn logout(&self);

    fn is_authenticated(&self) -> bool;

    fn token(&self) -> Option<String>;

    fn user(&self) -> Option<Value>;

    async fn impersonate(&self, _target: Value) -> Result<(), SecurityError> {
        Err(SecurityError::Unsupported("impersonation".into()))
    }

    async fn stop_impersonating(&self) -> Result<(), SecurityError> {
        Err(SecurityError::Unsupported("impersonation".into()))
    }

    /// Drop all session state. Defaults to `logout`.
    async fn destroy_session(&self) {
        self.logout().await;
    }

    /// Roles of the current principal, extracted from the user record's
    /// `roles` array by default.
    fn roles(&self) -> Vec<String> {
        self.user()
            .and_then(|u| u.get("roles").cloned())
            .and_then(|r| serde_json::from_value::<Vec<String>>(r).ok())
            .unwrap_or_default()
    }

    /// Attach session side effects to the bus (e.g. clearing state on
    /// `auth:expired`). Returns the subscriptions for later teardown.
    fn connect_signals(&self, _signals: &SignalBus) -> Vec<SignalSubscription> {
        Vec::new()
    }
}

/// Entity-level grant check consumed by entity managers.
pub trait EntityAuth: Send + Sync {
    /// Is the concrete permission key granted for the current principal?
    ///
    /// `record` allows record-level decisions; the stock implementation
    /// ignores it.
    fn is_granted(&self, permission: &str, record: Option<&Map<String, Value>>) -> bool;

    /// Permission strings of the current principal.
    fn permissions(&self) -> Vec<String>;
}

/// Stock [`EntityAuth`]: resolve the session's roles (or the anonymous
/// role) through a [`RoleGraph`] and match against its compiled grants.
pub struct RoleEntityAuth {
    graph: RoleGraph,
    session: Option<Arc<dyn SessionAuth>>,
}

impl RoleEntityAuth {
    pub fn new(graph: RoleGraph) -> Self {
        Self {
            graph,
            session: None,
        }
    }

    pub fn with_session(mut self, session: Arc<dyn SessionAuth>) -> Self {
        self.session = Some(session);
        self
    }

    fn current_permissions(&self) -> PermissionSet {
        match &self.session {
            Some(session) if session.is_authenticated() => {
                self.graph.permissions_of(&session.roles())
            }
            _ => self.graph.anonymous_permissions(),
        }
    }
}

impl EntityAuth for RoleEntityAuth {
    fn is_granted(&self, permission: &str, _record: Option<&Map<String, Value>>) -> bool {
        self.current_permissions().is_granted(permission)
    }

    fn permissions(&self) -> Vec<String> {
        self.current_permissions().grant_strings()
    }
}

#[derive(Default)]
struct MemorySessionState {
    token: Option<String>,
    user: Option<Value>,
    impersonation_stack: Vec<Value>,
}

/// In-memory [`SessionAuth`] for tests, demos, and mock backends.
///
/// `login` accepts any credentials carrying a `username`; `roles` in the
/// credentials become the user's roles.
#[derive(Clone, Default)]
pub struct MemorySession {
    state: Arc<RwLock<MemorySessionState>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start out already authenticated as the given user record.
    pub fn authenticated(user: Value) -> Self {
        let session = Self::new();
        {
            let mut state = session.state.write().expect("session lock poisoned");
            state.token = Some(format!(
                "session-{}",
                user.get("username").and_then(Value::as_str).unwrap_or("user")
            ));
            state.user = Some(user);
        }
        session
    }
}

#[async_trait]
impl SessionAuth for MemorySession {
    async fn login(&self, credentials: Value) -> Result<Value, SecurityError> {
        let username = credentials
            .get("username")
            .and_then(Value::as_str)
            .ok_or_else(|| SecurityError::AuthFailed("missing username".into()))?
            .to_string();
        let roles = credentials.get("roles").cloned().unwrap_or_else(|| json!([]));
        let user = json!({ "username": username, "roles": roles });
        let token = format!("session-{username}");
        let mut state = self.state.write().expect("session lock poisoned");
        state.token = Some(token.clone());
        state.user = Some(user.clone());
        state.impersonation_stack.clear();
        Ok(json!({ "token": token, "user": user }))
    }

    async fn logout(&self) {
        let mut state = self.state.write().expect("session lock poisoned");
        *state = MemorySessionState::default();
    }

    fn is_authenticated(&self) -> bool {
        self.state
            .read()
            .expect("session lock poisoned")
            .token
            .is_some()
    }

    fn token(&self) -> Option<String> {
        self.state.read().expect("session lock poisoned").token.clone()
    }

    fn user(&self) -> Option<Value> {
        self.state.read().expect("session lock poisoned").user.clone()
    }

    async fn impersonate(&self, target: Value) -> Result<(), SecurityError> {
        let mut state = self.state.write().expect("session lock poisoned");
        if state.token.is_none() {
            return Err(SecurityError::AuthFailed("not authenticated".into()));
        }
        let current = state.user.take().unwrap_or(Value::Null);
        state.impersonation_stack.push(current);
        state.user = Some(target);
        Ok(())
    }

    async fn stop_impersonating(&self) -> Result<(), SecurityError> {
        let mut state = self.state.write().expect("session lock poisoned");
        match state.impersonation_stack.pop() {
            Some(original) => {
                state.user = Some(original);
                Ok(())
            }
            None => Err(SecurityError::AuthFailed("not impersonating".into())),
        }
    }

    fn connect_signals(&self, signals: &SignalBus) -> Vec<SignalSubscription> {
        let state = self.state.clone();
        vec![signals.on(
            "auth:expired",
            move |_event| {
                let mut state = state.write().expect("session lock poisoned");
                *state = MemorySessionState::default();
            },
            SubscribeOptions::default().with_id("memory-session:expired"),
        )]
    }
}

use serde_json::Value;

/// Mutable context handed to `invoke` handlers.
///
/// The payload in `data` is shared down the chain; a handler may mutate it
/// and later handlers (and the invoker) observe the change. The two flags
/// mirror DOM-style event semantics: `prevent_default` asks the invoker to
/// skip its default behavior (the invoker must consult the flag),
/// `stop_propagation` ends the chain after the current handler.
#[derive(Debug)]
pub struct HookContext {
    pub data: Value,
    prevent_default: bool,
    stop_propagation: bool,
}

impl HookContext {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            prevent_default: false,
            stop_propagation: false,
        }
    }

    pub fn prevent_default(&mut self) {
        self.prevent_default = true;
    }

    pub fn is_default_prevented(&self) -> bool {
        self.prevent_default
    }

    pub fn stop_propagation(&mut self) {
        self.stop_propagation = true;
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.stop_propagation
    }
}

impl Default for HookContext {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

/// Errors raised by hook handlers.
#[derive(Debug)]
pub enum HookError {
    /// A handler vetoed the operation (e.g. a presave refusing a write).
    Veto(String),
    /// A handler failed for another reason.
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl HookError {
    pub fn veto(message: impl Into<String>) -> Self {
        HookError::Veto(message.into())
    }

    pub fn failed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        HookError::Failed(Box::new(err))
    }
}

impl std::fmt::Display for HookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookError::Veto(msg) => write!(f, "vetoed: {msg}"),
            HookError::Failed(err) => write!(f, "hook handler failed: {err}"),
        }
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HookError::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

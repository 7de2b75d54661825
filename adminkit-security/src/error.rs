/// Errors raised by the permission subsystem.
#[derive(Debug)]
pub enum SecurityError {
    /// A permission key failed to parse.
    InvalidKey(String),
    /// Adding a role would create an inheritance cycle.
    CyclicRole { cycle: Vec<String> },
    /// Login or impersonation failed.
    AuthFailed(String),
    /// The adapter does not support the requested operation.
    Unsupported(String),
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::InvalidKey(key) => write!(f, "invalid permission key '{key}'"),
            SecurityError::CyclicRole { cycle } => {
                write!(f, "role inheritance cycle: {}", cycle.join(" -> "))
            }
            SecurityError::AuthFailed(msg) => write!(f, "authentication failed: {msg}"),
            SecurityError::Unsupported(what) => write!(f, "unsupported operation: {what}"),
        }
    }
}

impl std::error::Error for SecurityError {}

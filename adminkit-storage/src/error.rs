use std::collections::BTreeMap;

/// Errors that can occur in the storage layer, by kind.
///
/// The same taxonomy flows through entity managers unchanged, so callers
/// branch on kind regardless of which backend produced the failure.
#[derive(Debug)]
pub enum StorageError {
    /// The requested record is absent.
    NotFound(String),
    /// Permission or session failure.
    Unauthorized(String),
    /// Optimistic-lock or duplicate-id conflict.
    Conflict(String),
    /// Validation or normalization failure, optionally per field.
    InvalidInput {
        message: String,
        fields: BTreeMap<String, String>,
    },
    /// Upstream storage/SDK error that is none of the above.
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    pub fn invalid(message: impl Into<String>) -> Self {
        StorageError::InvalidInput {
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn invalid_fields(message: impl Into<String>, fields: BTreeMap<String, String>) -> Self {
        StorageError::InvalidInput {
            message: message.into(),
            fields,
        }
    }

    /// Construct a `Backend` variant from any error type.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StorageError::Backend(Box::new(err))
    }

    /// Short tag for logs and user-visible failure rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "not_found",
            StorageError::Unauthorized(_) => "unauthorized",
            StorageError::Conflict(_) => "conflict",
            StorageError::InvalidInput { .. } => "invalid_input",
            StorageError::Backend(_) => "backend",
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            StorageError::Conflict(msg) => write!(f, "conflict: {msg}"),
            StorageError::InvalidInput { message, fields } if fields.is_empty() => {
                write!(f, "invalid input: {message}")
            }
            StorageError::InvalidInput { message, fields } => {
                let details: Vec<String> =
                    fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "invalid input: {message} ({})", details.join(", "))
            }
            StorageError::Backend(err) => write!(f, "backend error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Backend(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

//! The storage contract consumed by entity managers.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StorageError;
use crate::params::{ListParams, ListResult};

/// A record: field name → value. The id field must hold a stable,
/// serializable key (string or number).
pub type Record = Map<String, Value>;

/// Feature set a storage advertises. Missing flags default to `false`.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub supports_total: bool,
    pub supports_filters: bool,
    pub supports_pagination: bool,
    pub supports_caching: bool,
    /// Fields the backend's free-text search covers; also used for local
    /// search over cached datasets.
    pub search_fields: Vec<String>,
}

impl Capabilities {
    /// Everything on — the in-process adapters.
    pub fn full() -> Self {
        Self {
            supports_total: true,
            supports_filters: true,
            supports_pagination: true,
            supports_caching: true,
            search_fields: Vec::new(),
        }
    }

    pub fn with_search_fields(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Per-request routing context computed by the manager's storage resolver:
/// an endpoint override and default query params (request params win on
/// key collisions).
#[derive(Debug, Clone, Default)]
pub struct StorageContext {
    pub endpoint: Option<String>,
    pub params: Map<String, Value>,
}

impl StorageContext {
    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            params: Map::new(),
        }
    }
}

/// Options for the raw [`Storage::request`] escape hatch.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: Map<String, Value>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

/// Uniform CRUD surface implemented by every adapter.
///
/// `get_many` has a parallel-`get` fallback; `request` is an optional
/// escape hatch for non-CRUD endpoints; `normalize`/`denormalize` default
/// to the identity and are overridden by adapters that translate between
/// a backend schema and the entity schema.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    fn capabilities(&self) -> Capabilities;

    async fn list(
        &self,
        params: &ListParams,
        ctx: Option<&StorageContext>,
    ) -> Result<ListResult, StorageError>;

    async fn get(&self, id: &str, ctx: Option<&StorageContext>) -> Result<Record, StorageError>;

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Record>, StorageError> {
        futures_util::future::try_join_all(ids.iter().map(|id| self.get(id, None))).await
    }

    async fn create(&self, data: Record) -> Result<Record, StorageError>;

    /// Full replace.
    async fn update(&self, id: &str, data: Record) -> Result<Record, StorageError>;

    /// Merge into the existing record.
    async fn patch(&self, id: &str, data: Record) -> Result<Record, StorageError>;

    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    async fn request(
        &self,
        method: &str,
        path: &str,
        _options: RequestOptions,
    ) -> Result<Value, StorageError> {
        Err(StorageError::Backend(
            format!("raw request {method} {path} not supported by this storage").into(),
        ))
    }

    /// Whether [`request`](Storage::request) is backed by a real transport.
    fn has_request(&self) -> bool {
        false
    }

    /// Backend record → entity schema.
    fn normalize(&self, record: Record) -> Result<Record, StorageError> {
        Ok(record)
    }

    /// Entity schema → backend record.
    fn denormalize(&self, record: Record) -> Result<Record, StorageError> {
        Ok(record)
    }
}

/// Render an id value as the stable string key storages index by.
///
/// Strings pass through; numbers render in decimal. Other shapes are not
/// valid ids.
pub fn id_to_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract a record's id as a string key.
pub fn record_id(record: &Record, id_field: &str) -> Option<String> {
    record.get(id_field).and_then(id_to_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_keys_are_stable() {
        assert_eq!(id_to_key(&json!("abc")), Some("abc".to_string()));
        assert_eq!(id_to_key(&json!(42)), Some("42".to_string()));
        assert_eq!(id_to_key(&json!(null)), None);
        assert_eq!(id_to_key(&json!({"x": 1})), None);
    }

    #[test]
    fn record_id_reads_declared_field() {
        let mut record = Record::new();
        record.insert("uuid".into(), json!("u-1"));
        assert_eq!(record_id(&record, "uuid"), Some("u-1".to_string()));
        assert_eq!(record_id(&record, "id"), None);
    }
}

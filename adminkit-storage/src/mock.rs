//! Mock API storage: in-memory semantics with deterministic persistence.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::StorageError;
use crate::filtering;
use crate::kv::KeyValueStore;
use crate::params::{ListParams, ListResult};
use crate::storage::{record_id, Capabilities, Record, Storage, StorageContext};

type AuthCheck = Arc<dyn Fn() -> Result<(), StorageError> + Send + Sync>;

/// Development stand-in for a real API.
///
/// Rows persist write-through to a [`KeyValueStore`] under the
/// deterministic key `mockapi:<entity>:data` (a JSON array in insertion
/// order), so reloads keep the dataset. An optional `auth_check` runs
/// before every operation and rejects with `Unauthorized` when the caller
/// has no session, mirroring a protected endpoint.
pub struct MockApiStorage {
    entity_name: String,
    id_field: String,
    search_fields: Vec<String>,
    store: Arc<dyn KeyValueStore>,
    auth_check: Option<AuthCheck>,
}

impl std::fmt::Debug for MockApiStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockApiStorage").finish_non_exhaustive()
    }
}

impl MockApiStorage {
    pub fn new(entity_name: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            entity_name: entity_name.into(),
            id_field: "id".to_string(),
            search_fields: Vec::new(),
            store,
            auth_check: None,
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_search_fields(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Reject every operation unless the check passes.
    pub fn with_auth_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> Result<(), StorageError> + Send + Sync + 'static,
    {
        self.auth_check = Some(Arc::new(check));
        self
    }

    /// Seed the dataset if nothing is persisted yet.
    pub fn with_initial_data(self, rows: Vec<Record>) -> Self {
        if self.store.get(&self.persistence_key()).is_none() {
            self.save(&rows);
        }
        self
    }

    /// The deterministic persistence key: `mockapi:<entityName>:data`.
    pub fn persistence_key(&self) -> String {
        format!("mockapi:{}:data", self.entity_name)
    }

    pub fn distinct(&self, field: &str) -> Vec<Value> {
        filtering::distinct(&self.load(), field)
    }

    pub fn distinct_with_count(&self, field: &str) -> Vec<(Value, u64)> {
        filtering::distinct_with_count(&self.load(), field)
    }

    fn check_auth(&self) -> Result<(), StorageError> {
        match &self.auth_check {
            Some(check) => check(),
            None => Ok(()),
        }
    }

    fn load(&self) -> Vec<Record> {
        let Some(raw) = self.store.get(&self.persistence_key()) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(entity = %self.entity_name, %err, "discarding corrupt mock dataset");
            Vec::new()
        })
    }

    fn save(&self, rows: &[Record]) {
        let raw = serde_json::to_string(rows).expect("records serialize");
        self.store.set(&self.persistence_key(), raw);
    }

    fn not_found(&self, id: &str) -> StorageError {
        StorageError::NotFound(format!("{} '{id}'", self.entity_name))
    }
}

#[async_trait]
impl Storage for MockApiStorage {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search_fields: self.search_fields.clone(),
            ..Capabilities::full()
        }
    }

    async fn list(
        &self,
        params: &ListParams,
        _ctx: Option<&StorageContext>,
    ) -> Result<ListResult, StorageError> {
        self.check_auth()?;
        Ok(filtering::apply_list_params(
            self.load(),
            params,
            &self.search_fields,
        ))
    }

    async fn get(&self, id: &str, _ctx: Option<&StorageContext>) -> Result<Record, StorageError> {
        self.check_auth()?;
        self.load()
            .into_iter()
            .find(|r| record_id(r, &self.id_field).as_deref() == Some(id))
            .ok_or_else(|| self.not_found(id))
    }

    async fn create(&self, mut data: Record) -> Result<Record, StorageError> {
        self.check_auth()?;
        let mut rows = self.load();
        match record_id(&data, &self.id_field) {
            Some(id) => {
                if rows
                    .iter()
                    .any(|r| record_id(r, &self.id_field).as_deref() == Some(id.as_str()))
                {
                    return Err(StorageError::Conflict(format!(
                        "{} '{id}' already exists",
                        self.entity_name
                    )));
                }
            }
            None => {
                data.insert(self.id_field.clone(), json!(uuid::Uuid::new_v4().to_string()));
            }
        }
        rows.push(data.clone());
        self.save(&rows);
        Ok(data)
    }

    async fn update(&self, id: &str, mut data: Record) -> Result<Record, StorageError> {
        self.check_auth()?;
        let mut rows = self.load();
        let position = rows
            .iter()
            .position(|r| record_id(r, &self.id_field).as_deref() == Some(id))
            .ok_or_else(|| self.not_found(id))?;
        data.insert(self.id_field.clone(), json!(id));
        rows[position] = data.clone();
        self.save(&rows);
        Ok(data)
    }

    async fn patch(&self, id: &str, data: Record) -> Result<Record, StorageError> {
        self.check_auth()?;
        let mut rows = self.load();
        let position = rows
            .iter()
            .position(|r| record_id(r, &self.id_field).as_deref() == Some(id))
            .ok_or_else(|| self.not_found(id))?;
        for (key, value) in data {
            rows[position].insert(key, value);
        }
        let merged = rows[position].clone();
        self.save(&rows);
        Ok(merged)
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.check_auth()?;
        let mut rows = self.load();
        let position = rows
            .iter()
            .position(|r| record_id(r, &self.id_field).as_deref() == Some(id))
            .ok_or_else(|| self.not_found(id))?;
        rows.remove(position);
        self.save(&rows);
        Ok(())
    }
}

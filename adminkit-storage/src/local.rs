//! Storage over a host key–value store, one JSON array per collection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::StorageError;
use crate::filtering;
use crate::kv::KeyValueStore;
use crate::params::{ListParams, ListResult};
use crate::storage::{record_id, Capabilities, Record, Storage, StorageContext};

/// CRUD over a [`KeyValueStore`] entry holding the whole collection as a
/// JSON-serialized array in insertion order.
///
/// Every write persists the full array back, so the store observes each
/// mutation immediately (write-through).
pub struct LocalStorage {
    key: String,
    id_field: String,
    search_fields: Vec<String>,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage").finish_non_exhaustive()
    }
}

impl LocalStorage {
    pub fn new(key: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            key: key.into(),
            id_field: "id".to_string(),
            search_fields: Vec::new(),
            store,
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

    /// Seed the persisted array if the key is currently absent.
    pub fn with_initial_data(self, rows: Vec<Record>) -> Self {
        if self.store.get(&self.key).is_none() {
            self.save(&rows);
        }
        self
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    fn load(&self) -> Vec<Record> {
        let Some(raw) = self.store.get(&self.key) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<Record>>(&raw) {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(key = %self.key, %err, "discarding corrupt persisted collection");
                Vec::new()
            }
        }
    }

    fn save(&self, rows: &[Record]) {
        let raw = serde_json::to_string(rows).expect("records serialize");
        self.store.set(&self.key, raw);
    }

    fn not_found(&self, id: &str) -> StorageError {
        StorageError::NotFound(format!("{} '{id}'", self.key))
    }
}

#[async_trait]
impl Storage for LocalStorage {
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
        Ok(filtering::apply_list_params(
            self.load(),
            params,
            &self.search_fields,
        ))
    }

    async fn get(&self, id: &str, _ctx: Option<&StorageContext>) -> Result<Record, StorageError> {
        self.load()
            .into_iter()
            .find(|r| record_id(r, &self.id_field).as_deref() == Some(id))
            .ok_or_else(|| self.not_found(id))
    }

    async fn create(&self, mut data: Record) -> Result<Record, StorageError> {
        let mut rows = self.load();
        match record_id(&data, &self.id_field) {
            Some(id) => {
                if rows
                    .iter()
                    .any(|r| record_id(r, &self.id_field).as_deref() == Some(id.as_str()))
                {
                    return Err(StorageError::Conflict(format!(
                        "{} '{id}' already exists",
                        self.key
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

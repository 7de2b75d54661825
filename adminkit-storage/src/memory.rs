//! In-process storage over a row list.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::StorageError;
use crate::filtering;
use crate::params::{ListParams, ListResult};
use crate::storage::{record_id, Capabilities, Record, Storage, StorageContext};

/// In-memory storage keeping rows in insertion order.
///
/// Filters, search, sorting, and pagination run through the shared local
/// dataset engine. Missing ids on `create` are generated.
#[derive(Debug)]
pub struct MemoryStorage {
    name: String,
    id_field: String,
    search_fields: Vec<String>,
    rows: RwLock<Vec<Record>>,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: "id".to_string(),
            search_fields: Vec::new(),
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn with_data(name: impl Into<String>, rows: Vec<Record>) -> Self {
        let storage = Self::new(name);
        *storage.rows.write().expect("memory rows poisoned") = rows;
        storage
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_search_fields(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distinct values of a field across all rows.
    pub fn distinct(&self, field: &str) -> Vec<Value> {
        filtering::distinct(&self.rows.read().expect("memory rows poisoned"), field)
    }

    /// Distinct values with occurrence counts.
    pub fn distinct_with_count(&self, field: &str) -> Vec<(Value, u64)> {
        filtering::distinct_with_count(&self.rows.read().expect("memory rows poisoned"), field)
    }

    fn position(&self, rows: &[Record], id: &str) -> Option<usize> {
        rows.iter()
            .position(|r| record_id(r, &self.id_field).as_deref() == Some(id))
    }

    fn not_found(&self, id: &str) -> StorageError {
        StorageError::NotFound(format!("{} '{id}'", self.name))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
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
        let rows = self.rows.read().expect("memory rows poisoned").clone();
        Ok(filtering::apply_list_params(rows, params, &self.search_fields))
    }

    async fn get(&self, id: &str, _ctx: Option<&StorageContext>) -> Result<Record, StorageError> {
        let rows = self.rows.read().expect("memory rows poisoned");
        self.position(&rows, id)
            .map(|i| rows[i].clone())
            .ok_or_else(|| self.not_found(id))
    }

    async fn create(&self, mut data: Record) -> Result<Record, StorageError> {
        let mut rows = self.rows.write().expect("memory rows poisoned");
        match record_id(&data, &self.id_field) {
            Some(id) => {
                if self.position(&rows, &id).is_some() {
                    return Err(StorageError::Conflict(format!(
                        "{} '{id}' already exists",
                        self.name
                    )));
                }
            }
            None => {
                data.insert(self.id_field.clone(), json!(uuid::Uuid::new_v4().to_string()));
            }
        }
        rows.push(data.clone());
        Ok(data)
    }

    async fn update(&self, id: &str, mut data: Record) -> Result<Record, StorageError> {
        let mut rows = self.rows.write().expect("memory rows poisoned");
        let position = self.position(&rows, id).ok_or_else(|| self.not_found(id))?;
        data.insert(self.id_field.clone(), json!(id));
        rows[position] = data.clone();
        Ok(data)
    }

    async fn patch(&self, id: &str, data: Record) -> Result<Record, StorageError> {
        let mut rows = self.rows.write().expect("memory rows poisoned");
        let position = self.position(&rows, id).ok_or_else(|| self.not_found(id))?;
        for (key, value) in data {
            rows[position].insert(key, value);
        }
        Ok(rows[position].clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut rows = self.rows.write().expect("memory rows poisoned");
        let position = self.position(&rows, id).ok_or_else(|| self.not_found(id))?;
        rows.remove(position);
        Ok(())
    }
}

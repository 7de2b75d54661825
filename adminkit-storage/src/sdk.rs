//! Declarative storage binding over a generated SDK.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use crate::error::StorageError;
use crate::filtering;
use crate::params::{ListParams, ListResult};
use crate::storage::{Capabilities, Record, Storage, StorageContext};

/// A generated SDK: an object with named methods taking and returning JSON.
#[async_trait]
pub trait SdkClient: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, StorageError>;
}

type SdkCallback = Arc<
    dyn Fn(Arc<dyn SdkClient>, Value) -> BoxFuture<'static, Result<Value, StorageError>>
        + Send
        + Sync,
>;

/// How one CRUD operation maps onto the SDK.
#[derive(Clone)]
pub enum SdkOperation {
    /// Call the named SDK method with the built params.
    Method(String),
    /// Full control: receives the SDK handle and the built params.
    Callback(SdkCallback),
}

impl SdkOperation {
    pub fn method(name: impl Into<String>) -> Self {
        SdkOperation::Method(name.into())
    }

    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(Arc<dyn SdkClient>, Value) -> BoxFuture<'static, Result<Value, StorageError>>
            + Send
            + Sync
            + 'static,
    {
        SdkOperation::Callback(Arc::new(callback))
    }
}

/// Where list data lives inside an SDK response.
///
/// Resolution order: descend into `data_field` (if set), then take
/// `items_field` from an object (or the value itself when it is already an
/// array), then `total_field` (defaulting to the item count).
#[derive(Debug, Clone)]
pub struct SdkResponseFormat {
    pub data_field: Option<String>,
    pub items_field: String,
    pub total_field: String,
}

impl Default for SdkResponseFormat {
    fn default() -> Self {
        Self {
            data_field: Some("data".to_string()),
            items_field: "items".to_string(),
            total_field: "total".to_string(),
        }
    }
}

type ValueTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Storage over an [`SdkClient`] with per-operation method mapping.
///
/// Request transforms run global-then-per-operation; response transforms
/// run per-operation-then-global, after the response format has been
/// normalized. `with_client_side_pagination` serves SDKs that always
/// return the full row set: filters, search, sort, and paging then run
/// through the local dataset engine.
pub struct SdkStorage {
    sdk: Arc<dyn SdkClient>,
    operations: HashMap<String, SdkOperation>,
    response_format: SdkResponseFormat,
    request_transform: Option<ValueTransform>,
    response_transform: Option<ValueTransform>,
    op_request_transforms: HashMap<String, ValueTransform>,
    op_response_transforms: HashMap<String, ValueTransform>,
    client_side_pagination: bool,
    search_fields: Vec<String>,
}

impl std::fmt::Debug for SdkStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkStorage").finish_non_exhaustive()
    }
}

impl SdkStorage {
    pub fn new(sdk: Arc<dyn SdkClient>) -> Self {
        Self {
            sdk,
            operations: HashMap::new(),
            response_format: SdkResponseFormat::default(),
            request_transform: None,
            response_transform: None,
            op_request_transforms: HashMap::new(),
            op_response_transforms: HashMap::new(),
            client_side_pagination: false,
            search_fields: Vec::new(),
        }
    }

    /// Map one of `list`/`get`/`create`/`update`/`patch`/`delete`.
    pub fn with_operation(mut self, op: &str, operation: SdkOperation) -> Self {
        self.operations.insert(op.to_string(), operation);
        self
    }

    pub fn with_response_format(mut self, format: SdkResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_request_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.request_transform = Some(Arc::new(transform));
        self
    }

    pub fn with_response_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.response_transform = Some(Arc::new(transform));
        self
    }

    pub fn with_op_request_transform<F>(mut self, op: &str, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.op_request_transforms
            .insert(op.to_string(), Arc::new(transform));
        self
    }

    pub fn with_op_response_transform<F>(mut self, op: &str, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.op_response_transforms
            .insert(op.to_string(), Arc::new(transform));
        self
    }

    /// For SDKs returning all rows at once.
    pub fn with_client_side_pagination(mut self, enabled: bool) -> Self {
        self.client_side_pagination = enabled;
        self
    }

    pub fn with_search_fields(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    async fn invoke(&self, op: &str, params: Value) -> Result<Value, StorageError> {
        let operation = self.operations.get(op).ok_or_else(|| {
            StorageError::Backend(format!("SDK operation '{op}' not configured").into())
        })?;

        let mut params = params;
        if let Some(transform) = &self.request_transform {
            params = transform(params);
        }
        if let Some(transform) = self.op_request_transforms.get(op) {
            params = transform(params);
        }

        let mut response = match operation {
            SdkOperation::Method(method) => self.sdk.call(method, params).await?,
            SdkOperation::Callback(callback) => callback(self.sdk.clone(), params).await?,
        };

        if let Some(transform) = self.op_response_transforms.get(op) {
            response = transform(response);
        }
        if let Some(transform) = &self.response_transform {
            response = transform(response);
        }
        Ok(response)
    }

    fn unwrap_data(&self, response: Value) -> Value {
        match (&self.response_format.data_field, response) {
            (Some(field), Value::Object(mut body)) => {
                body.remove(field).unwrap_or(Value::Object(body))
            }
            (_, response) => response,
        }
    }

    fn parse_list(&self, response: Value) -> Result<(Vec<Record>, u64), StorageError> {
        let data = self.unwrap_data(response);
        let (items, total) = match data {
            Value::Array(items) => {
                let total = items.len() as u64;
                (items, total)
            }
            Value::Object(body) => {
                let items = body
                    .get(&self.response_format.items_field)
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| {
                        StorageError::Backend(
                            format!(
                                "SDK list response missing '{}' array",
                                self.response_format.items_field
                            )
                            .into(),
                        )
                    })?;
                let total = body
                    .get(&self.response_format.total_field)
                    .and_then(Value::as_u64)
                    .unwrap_or(items.len() as u64);
                (items, total)
            }
            other => {
                return Err(StorageError::Backend(
                    format!("unexpected SDK list response: {other}").into(),
                ))
            }
        };
        let records = items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                other => Err(StorageError::Backend(
                    format!("expected a record object, got {other}").into(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((records, total))
    }

    fn parse_record(&self, response: Value) -> Result<Record, StorageError> {
        match self.unwrap_data(response) {
            Value::Object(record) => Ok(record),
            other => Err(StorageError::Backend(
                format!("expected a record object, got {other}").into(),
            )),
        }
    }
}

fn list_params_value(params: &ListParams) -> Value {
    serde_json::to_value(params.sanitized()).unwrap_or_else(|_| json!({}))
}

#[async_trait]
impl Storage for SdkStorage {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_total: true,
            supports_filters: !self.client_side_pagination,
            supports_pagination: !self.client_side_pagination,
            supports_caching: true,
            search_fields: self.search_fields.clone(),
        }
    }

    async fn list(
        &self,
        params: &ListParams,
        _ctx: Option<&StorageContext>,
    ) -> Result<ListResult, StorageError> {
        if self.client_side_pagination {
            let response = self.invoke("list", json!({})).await?;
            let (records, _) = self.parse_list(response)?;
            return Ok(filtering::apply_list_params(
                records,
                params,
                &self.search_fields,
            ));
        }
        let response = self.invoke("list", list_params_value(params)).await?;
        let (items, total) = self.parse_list(response)?;
        Ok(ListResult::new(items, total))
    }

    async fn get(&self, id: &str, _ctx: Option<&StorageContext>) -> Result<Record, StorageError> {
        let response = self.invoke("get", json!({ "id": id })).await?;
        self.parse_record(response)
    }

    async fn create(&self, data: Record) -> Result<Record, StorageError> {
        let response = self.invoke("create", json!({ "data": data })).await?;
        self.parse_record(response)
    }

    async fn update(&self, id: &str, data: Record) -> Result<Record, StorageError> {
        let response = self
            .invoke("update", json!({ "id": id, "data": data }))
            .await?;
        self.parse_record(response)
    }

    async fn patch(&self, id: &str, data: Record) -> Result<Record, StorageError> {
        let response = self
            .invoke("patch", json!({ "id": id, "data": data }))
            .await?;
        self.parse_record(response)
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.invoke("delete", json!({ "id": id })).await?;
        Ok(())
    }
}

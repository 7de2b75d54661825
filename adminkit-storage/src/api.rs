//! HTTP-backed storage over a pluggable client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::StorageError;
use crate::params::{ListParams, ListResult};
use crate::storage::{Capabilities, Record, RequestOptions, Storage, StorageContext};

/// The HTTP-like client contract consumed by [`ApiStorage`].
///
/// Implementations return the parsed JSON response body and translate
/// transport/status failures into the shared error taxonomy.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, params: &Map<String, Value>) -> Result<Value, StorageError>;
    async fn post(&self, url: &str, body: &Value) -> Result<Value, StorageError>;
    async fn put(&self, url: &str, body: &Value) -> Result<Value, StorageError>;
    async fn patch(&self, url: &str, body: &Value) -> Result<Value, StorageError>;
    async fn delete(&self, url: &str) -> Result<Value, StorageError>;
    async fn request(
        &self,
        method: &str,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Value, StorageError>;
}

type RecordTransform = Arc<dyn Fn(Record) -> Result<Record, StorageError> + Send + Sync>;

/// Storage adapter over an [`HttpClient`].
///
/// The response shape is configurable (`items` / `total` keys, or a bare
/// array), filter keys can be renamed per backend via `param_mapping`, and
/// optional `normalize` / `denormalize` transforms translate between the
/// backend schema and the entity schema.
pub struct ApiStorage {
    endpoint: String,
    client: Arc<dyn HttpClient>,
    items_key: String,
    total_key: String,
    param_mapping: HashMap<String, String>,
    normalize: Option<RecordTransform>,
    denormalize: Option<RecordTransform>,
    search_fields: Vec<String>,
    supports_caching: bool,
}

impl std::fmt::Debug for ApiStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiStorage").finish_non_exhaustive()
    }
}

impl ApiStorage {
    pub fn new(endpoint: impl Into<String>, client: Arc<dyn HttpClient>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
            items_key: "items".to_string(),
            total_key: "total".to_string(),
            param_mapping: HashMap::new(),
            normalize: None,
            denormalize: None,
            search_fields: Vec::new(),
            supports_caching: true,
        }
    }

    pub fn with_items_key(mut self, key: impl Into<String>) -> Self {
        self.items_key = key.into();
        self
    }

    pub fn with_total_key(mut self, key: impl Into<String>) -> Self {
        self.total_key = key.into();
        self
    }

    /// Rename filter keys before they hit the wire (applied to filters
    /// only, never to page/sort/search params).
    pub fn with_param_mapping(mut self, mapping: &[(&str, &str)]) -> Self {
        self.param_mapping = mapping
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        self
    }

    pub fn with_normalize<F>(mut self, transform: F) -> Self
    where
        F: Fn(Record) -> Result<Record, StorageError> + Send + Sync + 'static,
    {
        self.normalize = Some(Arc::new(transform));
        self
    }

    pub fn with_denormalize<F>(mut self, transform: F) -> Self
    where
        F: Fn(Record) -> Result<Record, StorageError> + Send + Sync + 'static,
    {
        self.denormalize = Some(Arc::new(transform));
        self
    }

    pub fn with_search_fields(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_caching(mut self, supports_caching: bool) -> Self {
        self.supports_caching = supports_caching;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn effective_endpoint(&self, ctx: Option<&StorageContext>) -> String {
        ctx.and_then(|c| c.endpoint.clone())
            .unwrap_or_else(|| self.endpoint.clone())
    }

    fn item_url(&self, ctx: Option<&StorageContext>, id: &str) -> String {
        let endpoint = self.effective_endpoint(ctx);
        format!("{}/{id}", endpoint.trim_end_matches('/'))
    }

    fn query_params(&self, params: &ListParams, ctx: Option<&StorageContext>) -> Map<String, Value> {
        let mut query = Map::new();
        if let Some(ctx) = ctx {
            query.extend(ctx.params.clone());
        }
        let params = params.sanitized();
        if let Some(page) = params.page {
            query.insert("page".into(), json!(page));
        }
        if let Some(page_size) = params.page_size {
            query.insert("page_size".into(), json!(page_size));
        }
        if let Some(sort_by) = &params.sort_by {
            query.insert("sort_by".into(), json!(sort_by));
        }
        if let Some(order) = params.sort_order {
            query.insert(
                "sort_order".into(),
                json!(match order {
                    crate::params::SortOrder::Asc => "asc",
                    crate::params::SortOrder::Desc => "desc",
                }),
            );
        }
        if let Some(search) = &params.search {
            if !search.is_empty() {
                query.insert("search".into(), json!(search));
            }
        }
        for (field, value) in params.filters {
            let key = self
                .param_mapping
                .get(&field)
                .cloned()
                .unwrap_or(field);
            query.insert(key, value);
        }
        query
    }

    fn parse_list(&self, response: Value) -> Result<(Vec<Record>, u64), StorageError> {
        let (items, total) = match response {
            Value::Array(items) => {
                let total = items.len() as u64;
                (items, total)
            }
            Value::Object(body) => {
                let items = body
                    .get(&self.items_key)
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| {
                        StorageError::Backend(
                            format!("list response missing '{}' array", self.items_key).into(),
                        )
                    })?;
                let total = body
                    .get(&self.total_key)
                    .and_then(Value::as_u64)
                    .unwrap_or(items.len() as u64);
                (items, total)
            }
            other => {
                return Err(StorageError::Backend(
                    format!("unexpected list response shape: {other}").into(),
                ))
            }
        };
        let records = items
            .into_iter()
            .map(value_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((records, total))
    }
}

fn value_to_record(value: Value) -> Result<Record, StorageError> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(StorageError::Backend(
            format!("expected a record object, got {other}").into(),
        )),
    }
}

#[async_trait]
impl Storage for ApiStorage {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_total: true,
            supports_filters: true,
            supports_pagination: true,
            supports_caching: self.supports_caching,
            search_fields: self.search_fields.clone(),
        }
    }

    async fn list(
        &self,
        params: &ListParams,
        ctx: Option<&StorageContext>,
    ) -> Result<ListResult, StorageError> {
        let endpoint = self.effective_endpoint(ctx);
        let query = self.query_params(params, ctx);
        let response = self.client.get(&endpoint, &query).await?;
        let (records, total) = self.parse_list(response)?;
        let items = records
            .into_iter()
            .map(|r| self.normalize(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListResult::new(items, total))
    }

    async fn get(&self, id: &str, ctx: Option<&StorageContext>) -> Result<Record, StorageError> {
        let response = self
            .client
            .get(&self.item_url(ctx, id), &Map::new())
            .await?;
        self.normalize(value_to_record(response)?)
    }

    async fn create(&self, data: Record) -> Result<Record, StorageError> {
        let body = Value::Object(self.denormalize(data)?);
        let response = self.client.post(&self.endpoint, &body).await?;
        self.normalize(value_to_record(response)?)
    }

    async fn update(&self, id: &str, data: Record) -> Result<Record, StorageError> {
        let body = Value::Object(self.denormalize(data)?);
        let response = self.client.put(&self.item_url(None, id), &body).await?;
        self.normalize(value_to_record(response)?)
    }

    async fn patch(&self, id: &str, data: Record) -> Result<Record, StorageError> {
        let body = Value::Object(self.denormalize(data)?);
        let response = self.client.patch(&self.item_url(None, id), &body).await?;
        self.normalize(value_to_record(response)?)
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.client.delete(&self.item_url(None, id)).await?;
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        options: RequestOptions,
    ) -> Result<Value, StorageError> {
        let url = if path.starts_with('/') || path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}/{path}", self.endpoint.trim_end_matches('/'))
        };
        self.client.request(method, &url, &options).await
    }

    fn has_request(&self) -> bool {
        true
    }

    fn normalize(&self, record: Record) -> Result<Record, StorageError> {
        match &self.normalize {
            Some(transform) => transform(record),
            None => Ok(record),
        }
    }

    fn denormalize(&self, record: Record) -> Result<Record, StorageError> {
        match &self.denormalize {
            Some(transform) => transform(record),
            None => Ok(record),
        }
    }
}

// ── Stock reqwest-backed client ────────────────────────────────────────────

/// [`HttpClient`] over `reqwest`, translating HTTP statuses into the
/// shared error taxonomy (401/403 → `Unauthorized`, 404 → `NotFound`,
/// 409 → `Conflict`, 400/422 → `InvalidInput`).
pub struct ReqwestClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        params: Option<&Map<String, Value>>,
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<Value, StorageError> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(params) = params {
            let pairs: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| (k.clone(), query_value(v)))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(StorageError::backend)?;
        let status = response.status();
        if status.is_success() {
            if status == reqwest::StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            return response.json().await.map_err(StorageError::backend);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| status.to_string());
        Err(match status.as_u16() {
            401 | 403 => StorageError::Unauthorized(message),
            404 => StorageError::NotFound(message),
            409 => StorageError::Conflict(message),
            400 | 422 => StorageError::invalid(message),
            _ => StorageError::Backend(format!("{status}: {message}").into()),
        })
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, params: &Map<String, Value>) -> Result<Value, StorageError> {
        self.send(reqwest::Method::GET, url, Some(params), None, &[])
            .await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, StorageError> {
        self.send(reqwest::Method::POST, url, None, Some(body), &[])
            .await
    }

    async fn put(&self, url: &str, body: &Value) -> Result<Value, StorageError> {
        self.send(reqwest::Method::PUT, url, None, Some(body), &[])
            .await
    }

    async fn patch(&self, url: &str, body: &Value) -> Result<Value, StorageError> {
        self.send(reqwest::Method::PATCH, url, None, Some(body), &[])
            .await
    }

    async fn delete(&self, url: &str) -> Result<Value, StorageError> {
        self.send(reqwest::Method::DELETE, url, None, None, &[]).await
    }

    async fn request(
        &self,
        method: &str,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Value, StorageError> {
        let method = method
            .parse::<reqwest::Method>()
            .map_err(|_| StorageError::invalid(format!("invalid HTTP method '{method}'")))?;
        self.send(
            method,
            url,
            Some(&options.params),
            options.body.as_ref(),
            &options.headers,
        )
        .await
    }
}

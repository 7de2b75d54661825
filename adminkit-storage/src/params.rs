use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// List request parameters shared by every storage adapter.
///
/// `page` is 1-based. Filter values of `null` are dropped before they
/// reach any backend (see [`ListParams::sanitized`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.sort_order = Some(order);
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Copy with `null` filter values dropped.
    pub fn sanitized(&self) -> Self {
        let mut clean = self.clone();
        clean.filters.retain(|_, v| !v.is_null());
        clean
    }

    /// True when the request carries no filtering, search, or pagination.
    pub fn is_unconstrained(&self) -> bool {
        self.sanitized().filters.is_empty()
            && self.search.as_deref().map_or(true, str::is_empty)
            && self.page.is_none()
            && self.page_size.is_none()
    }
}

/// A page of records plus the backend's total count.
#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub items: Vec<Record>,
    pub total: u64,
}

impl ListResult {
    pub fn new(items: Vec<Record>, total: u64) -> Self {
        Self { items, total }
    }
}

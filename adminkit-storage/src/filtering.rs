//! Local dataset engine: filters, search, sorting, pagination, distinct.
//!
//! Shared by the in-process adapters (memory, local, mock) and by entity
//! managers filtering their opportunistic cache, so cache-served and
//! storage-served results of the same request agree.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::params::{ListParams, ListResult, SortOrder};
use crate::storage::Record;

/// Does the record satisfy every filter?
///
/// `null` filter values are dropped (not applied). A filter value may be
/// a plain value — substring match (case-insensitive) for strings,
/// equality otherwise — or an operator expression
/// `{ "operator": "eq"|"neq"|"gt"|"gte"|"lt"|"lte"|"in"|"contains", "value": .. }`.
pub fn matches_filters(record: &Record, filters: &Map<String, Value>) -> bool {
    filters.iter().all(|(field, expected)| {
        if expected.is_null() {
            return true;
        }
        filter_value_matches(record.get(field), expected)
    })
}

pub fn filter_value_matches(actual: Option<&Value>, expected: &Value) -> bool {
    if let Some(expr) = operator_expression(expected) {
        return apply_operator(actual, expr.0, expr.1);
    }
    let Some(actual) = actual else {
        return false;
    };
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => a.to_lowercase().contains(&e.to_lowercase()),
        _ => actual == expected,
    }
}

fn operator_expression(value: &Value) -> Option<(&str, &Value)> {
    let obj = value.as_object()?;
    let operator = obj.get("operator")?.as_str()?;
    Some((operator, obj.get("value")?))
}

fn apply_operator(actual: Option<&Value>, operator: &str, operand: &Value) -> bool {
    match operator {
        "eq" => actual == Some(operand),
        "neq" => actual != Some(operand),
        "in" => match (actual, operand.as_array()) {
            (Some(actual), Some(options)) => options.contains(actual),
            _ => false,
        },
        "contains" => match (actual.and_then(Value::as_str), operand.as_str()) {
            (Some(a), Some(e)) => a.to_lowercase().contains(&e.to_lowercase()),
            _ => false,
        },
        "gt" | "gte" | "lt" | "lte" => {
            let Some(actual) = actual else { return false };
            match compare_values(actual, operand) {
                Some(ordering) => match operator {
                    "gt" => ordering == Ordering::Greater,
                    "gte" => ordering != Ordering::Less,
                    "lt" => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                },
                None => false,
            }
        }
        other => {
            tracing::debug!(operator = other, "unknown filter operator; no match");
            false
        }
    }
}

/// Total order over scalar JSON values: numbers numerically, strings
/// case-insensitively. Mixed or non-scalar pairs are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64()?, b.as_f64()?);
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => {
            Some(a.to_lowercase().cmp(&b.to_lowercase()))
        }
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Case-insensitive free-text match across the given fields.
pub fn matches_search(record: &Record, term: &str, fields: &[String]) -> bool {
    if term.is_empty() {
        return true;
    }
    let term = term.to_lowercase();
    fields.iter().any(|field| {
        record
            .get(field)
            .map(|value| match value {
                Value::String(s) => s.to_lowercase().contains(&term),
                other => other.to_string().to_lowercase().contains(&term),
            })
            .unwrap_or(false)
    })
}

/// Stable in-place sort by one field. Records missing the field sort last.
pub fn sort_records(items: &mut [Record], sort_by: &str, order: SortOrder) {
    items.sort_by(|a, b| {
        let ordering = match (a.get(sort_by), b.get(sort_by)) {
            (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

/// Slice one page out of the full set. `page` is 1-based; a `page_size`
/// larger than the set returns everything.
pub fn paginate(items: Vec<Record>, page: Option<u64>, page_size: Option<u64>) -> Vec<Record> {
    let Some(page_size) = page_size else {
        return items;
    };
    let page = page.unwrap_or(1).max(1);
    let start = ((page - 1) * page_size) as usize;
    items
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect()
}

/// Run the full list pipeline over an in-process dataset:
/// filters → search → total → sort → paginate.
pub fn apply_list_params(
    items: Vec<Record>,
    params: &ListParams,
    search_fields: &[String],
) -> ListResult {
    let params = params.sanitized();
    let mut filtered: Vec<Record> = items
        .into_iter()
        .filter(|record| matches_filters(record, &params.filters))
        .filter(|record| {
            params
                .search
                .as_deref()
                .map_or(true, |term| matches_search(record, term, search_fields))
        })
        .collect();

    let total = filtered.len() as u64;
    if let Some(sort_by) = &params.sort_by {
        sort_records(&mut filtered, sort_by, params.sort_order.unwrap_or_default());
    }
    let items = paginate(filtered, params.page, params.page_size);
    ListResult::new(items, total)
}

/// Distinct values of one field, in first-seen order.
pub fn distinct(items: &[Record], field: &str) -> Vec<Value> {
    let mut seen = Vec::new();
    for record in items {
        if let Some(value) = record.get(field) {
            if !value.is_null() && !seen.contains(value) {
                seen.push(value.clone());
            }
        }
    }
    seen
}

/// Distinct values of one field with occurrence counts, in first-seen order.
pub fn distinct_with_count(items: &[Record], field: &str) -> Vec<(Value, u64)> {
    let mut order = Vec::new();
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for record in items {
        if let Some(value) = record.get(field) {
            if value.is_null() {
                continue;
            }
            let key = value.to_string();
            if !counts.contains_key(&key) {
                order.push(value.clone());
            }
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    order
        .into_iter()
        .map(|value| {
            let count = counts[&value.to_string()];
            (value, count)
        })
        .collect()
}

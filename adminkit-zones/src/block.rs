use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default block weight when none is declared.
pub const DEFAULT_WEIGHT: i32 = 50;

/// How a registration combines with the blocks already in the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockOperation {
    #[default]
    Add,
    Replace,
    Extend,
    Wrap,
}

/// A block registration: a renderable component descriptor plus placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDef {
    /// Unique within the zone; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Component name resolved by the host view layer.
    pub component: String,
    /// Ascending render order; ties broken by registration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
    #[serde(default)]
    pub props: Value,
    #[serde(default)]
    pub operation: BlockOperation,
    /// Target id for `replace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
    /// Target id for `extend` (insert just before it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// Target id for `extend` (insert just after it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Target id for `wrap`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wraps: Option<String>,
}

impl BlockDef {
    pub fn add(component: impl Into<String>) -> Self {
        Self {
            id: None,
            component: component.into(),
            weight: None,
            props: Value::Null,
            operation: BlockOperation::Add,
            replaces: None,
            before: None,
            after: None,
            wraps: None,
        }
    }

    pub fn replace(component: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            replaces: Some(target.into()),
            operation: BlockOperation::Replace,
            ..Self::add(component)
        }
    }

    pub fn extend_before(component: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            before: Some(target.into()),
            operation: BlockOperation::Extend,
            ..Self::add(component)
        }
    }

    pub fn extend_after(component: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            after: Some(target.into()),
            operation: BlockOperation::Extend,
            ..Self::add(component)
        }
    }

    pub fn wrap(component: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            wraps: Some(target.into()),
            operation: BlockOperation::Wrap,
            ..Self::add(component)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_props(mut self, props: Value) -> Self {
        self.props = props;
        self
    }
}

/// A wrapper attached to a resolved block.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Wrapper {
    pub id: String,
    pub component: String,
    pub props: Value,
    pub weight: i32,
}

/// One effective block after operation resolution.
///
/// `wrappers` is ordered innermost first: the renderer nests the target in
/// `wrappers[0]`, that in `wrappers[1]`, and so on outwards.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedBlock {
    pub id: String,
    pub component: String,
    pub weight: i32,
    pub props: Value,
    pub wrappers: Vec<Wrapper>,
}

use serde::{Deserialize, Serialize};

/// One ancestor in a parent chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub entity: String,
    pub id: String,
}

/// Per-request routing context: the ordered ancestry (root ancestor first,
/// direct parent last) plus an optional caller scope.
///
/// The parent chain selects context-specific storage endpoints and injects
/// default filters for child lists; the scope participates in the
/// permission gate via each entity's scope whitelist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub parent_chain: Vec<ParentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for records nested directly under one parent.
    pub fn child_of(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            parent_chain: vec![ParentRef {
                entity: entity.into(),
                id: id.into(),
            }],
            scope: None,
        }
    }

    pub fn nested_under(mut self, entity: impl Into<String>, id: impl Into<String>) -> Self {
        self.parent_chain.push(ParentRef {
            entity: entity.into(),
            id: id.into(),
        });
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// The direct parent (last chain element).
    pub fn direct_parent(&self) -> Option<&ParentRef> {
        self.parent_chain.last()
    }

    /// True when the context does not affect storage routing.
    pub fn is_plain(&self) -> bool {
        self.parent_chain.is_empty()
    }
}

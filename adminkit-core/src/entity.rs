//! Declarative entity definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use crate::context::RequestContext;

type FieldValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// A field default: a scalar, or a function of the routing context (e.g.
/// "today", or the direct parent's id).
#[derive(Clone)]
pub enum FieldDefault {
    Value(Value),
    Computed(Arc<dyn Fn(&RequestContext) -> Value + Send + Sync>),
}

impl FieldDefault {
    pub fn resolve(&self, ctx: &RequestContext) -> Value {
        match self {
            FieldDefault::Value(value) => value.clone(),
            FieldDefault::Computed(compute) => compute(ctx),
        }
    }
}

impl std::fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldDefault::Value(value) => f.debug_tuple("Value").field(value).finish(),
            FieldDefault::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// One field of an entity's schema.
#[derive(Clone)]
pub struct FieldDef {
    pub field_type: String,
    pub label: Option<String>,
    pub required: bool,
    pub default: Option<FieldDefault>,
    pub editable: bool,
    pub listable: bool,
    /// Weak link: the field holds an id of the named entity.
    pub reference: Option<String>,
    /// Choices for select-style fields.
    pub options: Vec<Value>,
    pub validate: Option<FieldValidator>,
}

impl FieldDef {
    pub fn new(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            label: None,
            required: false,
            default: None,
            editable: true,
            listable: true,
            reference: None,
            options: Vec::new(),
            validate: None,
        }
    }

    pub fn string() -> Self {
        Self::new("string")
    }

    pub fn number() -> Self {
        Self::new("number")
    }

    pub fn boolean() -> Self {
        Self::new("boolean")
    }

    /// A weak reference field pointing at another entity.
    pub fn reference(entity: impl Into<String>) -> Self {
        let mut field = Self::new("reference");
        field.reference = Some(entity.into());
        field
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn hidden_in_lists(mut self) -> Self {
        self.listable = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(FieldDefault::Value(value));
        self
    }

    pub fn with_computed_default<F>(mut self, compute: F) -> Self
    where
        F: Fn(&RequestContext) -> Value + Send + Sync + 'static,
    {
        self.default = Some(FieldDefault::Computed(Arc::new(compute)));
        self
    }

    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }
}

impl std::fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDef")
            .field("type", &self.field_type)
            .field("required", &self.required)
            .field("reference", &self.reference)
            .finish()
    }
}

/// Strong hierarchy: this entity's records belong to one parent record.
#[derive(Debug, Clone)]
pub struct ParentDef {
    /// Relation role (e.g. "project").
    pub role: String,
    pub entity: String,
    /// Field on this entity holding the parent id.
    pub foreign_key: String,
}

/// Inverse of a parent declaration, with an optional nested endpoint.
#[derive(Debug, Clone)]
pub struct ChildDef {
    pub role: String,
    pub entity: String,
    pub endpoint: Option<String>,
}

/// A declared kind of record: schema, relations, and policy knobs.
#[derive(Clone)]
pub struct EntityDef {
    pub name: String,
    pub id_field: String,
    pub label: String,
    pub label_plural: String,
    /// Field used for human display.
    pub label_field: String,
    /// Route naming convention; recorded for UI collaborators, unused by
    /// the core logic.
    pub route_prefix: Option<String>,
    pub fields: Vec<(String, FieldDef)>,
    pub parents: Vec<ParentDef>,
    pub children: Vec<ChildDef>,
    /// Scopes that bypass the permission gate.
    pub scope_whitelist: BTreeSet<String>,
    /// `0` disables the opportunistic cache.
    pub local_filter_threshold: u64,
    pub read_only: bool,
    /// field → (rendered value → severity tag).
    pub severity_map: BTreeMap<String, BTreeMap<String, String>>,
    pub warmup: bool,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            label_plural: format!("{name}s"),
            name,
            id_field: "id".to_string(),
            label_field: "id".to_string(),
            route_prefix: None,
            fields: Vec::new(),
            parents: Vec::new(),
            children: Vec::new(),
            scope_whitelist: BTreeSet::new(),
            local_filter_threshold: 0,
            read_only: false,
            severity_map: BTreeMap::new(),
            warmup: true,
        }
    }

    pub fn with_labels(mut self, label: impl Into<String>, plural: impl Into<String>) -> Self {
        self.label = label.into();
        self.label_plural = plural.into();
        self
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_label_field(mut self, field: impl Into<String>) -> Self {
        self.label_field = field.into();
        self
    }

    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = Some(prefix.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldDef) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn with_parent(
        mut self,
        role: impl Into<String>,
        entity: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.parents.push(ParentDef {
            role: role.into(),
            entity: entity.into(),
            foreign_key: foreign_key.into(),
        });
        self
    }

    pub fn with_child(
        mut self,
        role: impl Into<String>,
        entity: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Self {
        self.children.push(ChildDef {
            role: role.into(),
            entity: entity.into(),
            endpoint: endpoint.map(String::from),
        });
        self
    }

    pub fn with_scope_whitelist(mut self, scopes: &[&str]) -> Self {
        self.scope_whitelist = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.local_filter_threshold = threshold;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_severity(
        mut self,
        field: impl Into<String>,
        map: &[(&str, &str)],
    ) -> Self {
        self.severity_map.insert(
            field.into(),
            map.iter()
                .map(|(value, severity)| (value.to_string(), severity.to_string()))
                .collect(),
        );
        self
    }

    pub fn without_warmup(mut self) -> Self {
        self.warmup = false;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, def)| def)
    }

    /// The parent declaration matching the given entity, if any.
    pub fn parent_by_entity(&self, entity: &str) -> Option<&ParentDef> {
        self.parents.iter().find(|p| p.entity == entity)
    }
}

impl std::fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("id_field", &self.id_field)
            .field("fields", &self.fields.len())
            .field("threshold", &self.local_filter_threshold)
            .field("read_only", &self.read_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_defaults() {
        let def = EntityDef::new("books");
        assert_eq!(def.id_field, "id");
        assert_eq!(def.label_plural, "bookss"); // hosts override via with_labels
        assert_eq!(def.local_filter_threshold, 0);
        assert!(def.warmup);
    }

    #[test]
    fn field_lookup_preserves_declaration_order() {
        let def = EntityDef::new("books")
            .with_field("title", FieldDef::string().required())
            .with_field("author", FieldDef::string());
        assert_eq!(def.fields[0].0, "title");
        assert!(def.field("title").unwrap().required);
        assert!(def.field("missing").is_none());
    }

    #[test]
    fn computed_defaults_see_the_context() {
        let field = FieldDef::string().with_computed_default(|ctx| {
            json!(ctx.direct_parent().map(|p| p.id.clone()).unwrap_or_default())
        });
        let ctx = RequestContext::child_of("projects", "42");
        assert_eq!(field.default.unwrap().resolve(&ctx), json!("42"));
    }

    #[test]
    fn parent_lookup() {
        let def = EntityDef::new("tasks").with_parent("project", "projects", "project_id");
        assert_eq!(
            def.parent_by_entity("projects").unwrap().foreign_key,
            "project_id"
        );
        assert!(def.parent_by_entity("users").is_none());
    }
}

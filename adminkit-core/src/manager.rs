//! The per-entity CRUD façade: permissions, cache, routing, hooks, signals.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Instant;

use adminkit_hooks::{HookContext, HookError, HookRegistry};
use adminkit_security::EntityAuth;
use adminkit_signals::{DeferredRegistry, SignalBus};
use adminkit_storage::filtering;
use adminkit_storage::{
    id_to_key, record_id, ListParams, ListResult, Record, RequestOptions, Storage, StorageContext,
    StorageError,
};
use serde_json::{json, Map, Value};

use crate::context::RequestContext;
use crate::entity::EntityDef;
use crate::orchestrator::Orchestrator;

/// Shared services injected by the orchestrator on registration.
#[derive(Clone)]
pub struct Services {
    pub signals: SignalBus,
    pub hooks: HookRegistry,
    pub deferred: DeferredRegistry,
    pub auth: Option<Arc<dyn EntityAuth>>,
}

impl Services {
    pub fn new(signals: SignalBus, hooks: HookRegistry, deferred: DeferredRegistry) -> Self {
        Self {
            signals,
            hooks,
            deferred,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Arc<dyn EntityAuth>) -> Self {
        self.auth = Some(auth);
        self
    }
}

type AccessCheck = Arc<dyn Fn(Option<&Record>) -> bool + Send + Sync>;

/// Per-action access overrides; when set for an action, the override's
/// verdict replaces the entity auth adapter's.
#[derive(Clone, Default)]
pub struct AccessOverrides {
    pub list: Option<AccessCheck>,
    pub read: Option<AccessCheck>,
    pub create: Option<AccessCheck>,
    pub update: Option<AccessCheck>,
    pub delete: Option<AccessCheck>,
}

impl AccessOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&Record>) -> bool + Send + Sync + 'static,
    {
        self.read = Some(Arc::new(check));
        self
    }

    pub fn with_list<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&Record>) -> bool + Send + Sync + 'static,
    {
        self.list = Some(Arc::new(check));
        self
    }

    pub fn with_create<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&Record>) -> bool + Send + Sync + 'static,
    {
        self.create = Some(Arc::new(check));
        self
    }

    pub fn with_update<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&Record>) -> bool + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(check));
        self
    }

    pub fn with_delete<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&Record>) -> bool + Send + Sync + 'static,
    {
        self.delete = Some(Arc::new(check));
        self
    }

    fn for_action(&self, action: &str) -> Option<&AccessCheck> {
        match action {
            "list" => self.list.as_ref(),
            "read" => self.read.as_ref(),
            "create" => self.create.as_ref(),
            "update" => self.update.as_ref(),
            "delete" => self.delete.as_ref(),
            _ => None,
        }
    }
}

/// Outcome of the per-operation storage resolver.
pub enum StorageRoute {
    /// Override the endpoint on the default storage.
    Endpoint(String),
    /// Endpoint plus default query params (request params win).
    EndpointWithParams {
        endpoint: String,
        params: Map<String, Value>,
    },
    /// Route through an alternate storage instance entirely.
    Storage {
        storage: Arc<dyn Storage>,
        endpoint: Option<String>,
    },
}

type StorageRouter = Arc<dyn Fn(&str, &RequestContext) -> Option<StorageRoute> + Send + Sync>;

/// Options for [`EntityManager::query`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Caller asserts every filter can be evaluated offline; without it, a
    /// filter on a field outside the entity schema forces storage
    /// delegation.
    pub cache_safe: bool,
}

/// A list/query result with cache provenance.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub items: Vec<Record>,
    pub total: u64,
    pub from_cache: bool,
}

enum CacheState {
    Unfilled,
    Filled {
        items: Vec<Record>,
        #[allow(dead_code)]
        filled_at: Instant,
    },
    Overflow {
        #[allow(dead_code)]
        total: u64,
    },
}

/// Per-entity CRUD façade.
///
/// Every operation runs the permission gate, resolves storage routing from
/// the request context, consults/fills the opportunistic cache where the
/// policy allows, and drives the hook/signal lifecycle around writes:
/// presave → storage → cache invalidation → postsave → entity signals.
pub struct EntityManager {
    def: EntityDef,
    storage: Arc<dyn Storage>,
    router: Option<StorageRouter>,
    overrides: AccessOverrides,
    cache: Mutex<CacheState>,
    services: OnceLock<Services>,
    orchestrator: OnceLock<Weak<Orchestrator>>,
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager").finish_non_exhaustive()
    }
}

impl EntityManager {
    pub fn new(def: EntityDef, storage: Arc<dyn Storage>) -> Self {
        Self {
            def,
            storage,
            router: None,
            overrides: AccessOverrides::default(),
            cache: Mutex::new(CacheState::Unfilled),
            services: OnceLock::new(),
            orchestrator: OnceLock::new(),
        }
    }

    /// Install a per-operation storage resolver (multi-storage routing).
    pub fn with_router<F>(mut self, router: F) -> Self
    where
        F: Fn(&str, &RequestContext) -> Option<StorageRoute> + Send + Sync + 'static,
    {
        self.router = Some(Arc::new(router));
        self
    }

    pub fn with_overrides(mut self, overrides: AccessOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &EntityDef {
        &self.def
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Called by the orchestrator when the manager is registered.
    pub fn on_register(&self, services: Services, orchestrator: Weak<Orchestrator>) {
        let _ = self.services.set(services);
        let _ = self.orchestrator.set(orchestrator);
    }

    // ── Reads ──────────────────────────────────────────────────────────

    pub async fn list(
        &self,
        params: &ListParams,
        ctx: Option<&RequestContext>,
    ) -> Result<QueryResult, StorageError> {
        self.can_access("list", None, ctx)?;
        let (storage, storage_ctx, is_default) = self.route("list", ctx);
        let mut params = params.sanitized();
        self.apply_parent_filters(&mut params, ctx);
        let result = storage.list(&params, storage_ctx.as_ref()).await?;
        if is_default && self.caching_enabled() && params.is_unconstrained() {
            self.fill_cache(&result);
        }
        Ok(QueryResult {
            items: result.items,
            total: result.total,
            from_cache: false,
        })
    }

    pub async fn get(
        &self,
        id: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<Record, StorageError> {
        self.can_access("read", None, ctx)?;
        let (storage, storage_ctx, _) = self.route("get", ctx);
        storage.get(id, storage_ctx.as_ref()).await
    }

    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Record>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.can_access("read", None, None)?;
        self.storage.get_many(ids).await
    }

    /// Smart routing: serve from the opportunistic cache when the policy
    /// allows, fall back to storage otherwise.
    pub async fn query(
        &self,
        params: &ListParams,
        options: QueryOptions,
        ctx: Option<&RequestContext>,
    ) -> Result<QueryResult, StorageError> {
        self.can_access("list", None, ctx)?;
        let (_, _, is_default) = self.route("list", ctx);
        let mut effective = params.sanitized();
        self.apply_parent_filters(&mut effective, ctx);

        if is_default
            && self.caching_enabled()
            && self.filters_evaluable_locally(&effective, options)
        {
            if let Some(result) = self.query_cache(&effective).await {
                return Ok(result);
            }
        }
        self.list(&effective, ctx).await
    }

    /// Raw escape hatch, available when the storage exposes one.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        options: RequestOptions,
    ) -> Result<Value, StorageError> {
        if !self.storage.has_request() {
            return Err(StorageError::Backend(
                format!("storage of '{}' does not expose raw requests", self.def.name).into(),
            ));
        }
        self.storage.request(method, path, options).await
    }

    // ── Writes ─────────────────────────────────────────────────────────

    pub async fn create(
        &self,
        data: Record,
        ctx: Option<&RequestContext>,
    ) -> Result<Record, StorageError> {
        self.ensure_writable()?;
        self.can_access("create", Some(&data), ctx)?;

        let mut record = data;
        let default_ctx = ctx.cloned().unwrap_or_default();
        self.apply_defaults(&mut record, &default_ctx);
        self.validate(&record, true)?;

        let payload = json!({
            "entity": self.def.name,
            "record": record,
            "isNew": true,
            "manager": self.def.name,
        });
        let record = self.presave(payload).await?;

        let (storage, _, _) = self.route("create", ctx);
        let result = storage.create(record).await?;
        self.after_write("created", &result, true).await?;
        Ok(result)
    }

    /// Full replace.
    pub async fn update(
        &self,
        id: &str,
        data: Record,
        ctx: Option<&RequestContext>,
    ) -> Result<Record, StorageError> {
        self.ensure_writable()?;
        self.can_access("update", Some(&data), ctx)?;
        self.validate(&data, true)?;

        let payload = json!({
            "entity": self.def.name,
            "record": data,
            "isNew": false,
            "id": id,
            "manager": self.def.name,
        });
        let record = self.presave(payload).await?;

        let (storage, _, _) = self.route("update", ctx);
        let result = storage.update(id, record).await?;
        self.after_write("updated", &result, false).await?;
        Ok(result)
    }

    /// Partial merge.
    pub async fn patch(
        &self,
        id: &str,
        data: Record,
        ctx: Option<&RequestContext>,
    ) -> Result<Record, StorageError> {
        self.ensure_writable()?;
        self.can_access("update", Some(&data), ctx)?;
        self.validate(&data, false)?;

        let payload = json!({
            "entity": self.def.name,
            "record": data,
            "isNew": false,
            "id": id,
            "manager": self.def.name,
        });
        let record = self.presave(payload).await?;

        let (storage, _, _) = self.route("patch", ctx);
        let result = storage.patch(id, record).await?;
        self.after_write("updated", &result, false).await?;
        Ok(result)
    }

    pub async fn delete(
        &self,
        id: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.can_access("delete", None, ctx)?;

        let payload = json!({
            "entity": self.def.name,
            "id": id,
            "manager": self.def.name,
        });
        self.run_lifecycle("predelete", payload).await?;

        let (storage, _, _) = self.route("delete", ctx);
        storage.delete(id).await?;

        self.invalidate_and_broadcast();
        let payload = json!({
            "entity": self.def.name,
            "id": id,
            "result": Value::Null,
            "manager": self.def.name,
        });
        self.run_lifecycle("postdelete", payload).await?;
        let mut data = Record::new();
        data.insert(self.def.id_field.clone(), json!(id));
        self.emit_entity_signal("deleted", Value::Object(data));
        Ok(())
    }

    // ── Cache ──────────────────────────────────────────────────────────

    /// Drop the cache without broadcasting (the broadcast handler calls
    /// this, so broadcasting here would loop).
    pub fn invalidate_cache(&self) {
        *self.cache.lock().expect("cache lock poisoned") = CacheState::Unfilled;
    }

    /// `"unfilled"`, `"filled"`, or `"overflow"`.
    pub fn cache_status(&self) -> &'static str {
        match &*self.cache.lock().expect("cache lock poisoned") {
            CacheState::Unfilled => "unfilled",
            CacheState::Filled { .. } => "filled",
            CacheState::Overflow { .. } => "overflow",
        }
    }

    /// A record out of the filled cache, by id. Never touches storage.
    pub fn cached_record(&self, id: &str) -> Option<Record> {
        match &*self.cache.lock().expect("cache lock poisoned") {
            CacheState::Filled { items, .. } => items
                .iter()
                .find(|r| record_id(r, &self.def.id_field).as_deref() == Some(id))
                .cloned(),
            _ => None,
        }
    }

    /// Queue a boot-time cache fill under `entity:<name>:cache`.
    ///
    /// Fire-and-forget: when an auth adapter is configured the fill waits
    /// for `auth:ready` first. Failures are silent here and observable via
    /// the deferred key's status.
    pub fn warmup(self: Arc<Self>) {
        let Some(services) = self.services.get().cloned() else {
            return;
        };
        if !self.def.warmup || !self.caching_enabled() {
            return;
        }
        let manager = self;
        tokio::spawn(async move {
            if services.auth.is_some() && services.deferred.wait("auth:ready").await.is_err() {
                return;
            }
            let key = format!("entity:{}:cache", manager.def.name);
            let fill = manager.clone();
            let _ = services
                .deferred
                .queue(&key, move || async move {
                    let result = fill
                        .list(&ListParams::new(), None)
                        .await
                        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
                    Ok(json!({ "total": result.total }))
                })
                .await;
        });
    }

    // ── Schema helpers ─────────────────────────────────────────────────

    /// The default record used to seed creation forms.
    pub fn get_initial_data(&self, ctx: &RequestContext) -> Record {
        let mut record = Record::new();
        self.apply_defaults(&mut record, ctx);
        record
    }

    /// Human display string for a record, via the entity's label field.
    pub fn label_of(&self, record: &Record) -> String {
        record
            .get(&self.def.label_field)
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| record_id(record, &self.def.id_field))
            .unwrap_or_default()
    }

    /// Severity tag for a field value, from the entity's severity map.
    pub fn severity_of(&self, field: &str, value: &Value) -> Option<String> {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.def
            .severity_map
            .get(field)
            .and_then(|map| map.get(&rendered))
            .cloned()
    }

    /// The list-page configuration after `list:alter` hooks.
    pub async fn list_config(&self) -> Result<Value, StorageError> {
        let columns: Vec<&String> = self
            .def
            .fields
            .iter()
            .filter(|(_, f)| f.listable)
            .map(|(name, _)| name)
            .collect();
        let config = json!({
            "entity": self.def.name,
            "label": self.def.label_plural,
            "columns": columns,
            "id_field": self.def.id_field,
        });
        let Some(services) = self.services.get() else {
            return Ok(config);
        };
        let config = services
            .hooks
            .alter("list:alter", config)
            .await
            .map_err(hook_to_storage)?;
        services
            .hooks
            .alter(&format!("{}:list:alter", self.def.name), config)
            .await
            .map_err(hook_to_storage)
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn caching_enabled(&self) -> bool {
        self.def.local_filter_threshold > 0 && self.storage.capabilities().supports_caching
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.def.read_only {
            return Err(StorageError::invalid(format!(
                "entity '{}' is read-only",
                self.def.name
            )));
        }
        Ok(())
    }

    fn can_access(
        &self,
        action: &str,
        record: Option<&Record>,
        ctx: Option<&RequestContext>,
    ) -> Result<(), StorageError> {
        if let Some(scope) = ctx.and_then(|c| c.scope.as_deref()) {
            if self.def.scope_whitelist.contains(scope) {
                return Ok(());
            }
        }
        if let Some(check) = self.overrides.for_action(action) {
            return if check(record) {
                Ok(())
            } else {
                Err(self.denied(action))
            };
        }
        if let Some(auth) = self.services.get().and_then(|s| s.auth.as_ref()) {
            let key = format!("entity:{}:{}", self.def.name, action);
            if !auth.is_granted(&key, record) {
                return Err(self.denied(action));
            }
        }
        Ok(())
    }

    fn denied(&self, action: &str) -> StorageError {
        StorageError::Unauthorized(format!("{} on '{}' denied", action, self.def.name))
    }

    fn route(
        &self,
        method: &str,
        ctx: Option<&RequestContext>,
    ) -> (Arc<dyn Storage>, Option<StorageContext>, bool) {
        let (Some(router), Some(ctx)) = (&self.router, ctx) else {
            return (self.storage.clone(), None, true);
        };
        match router(method, ctx) {
            None => (self.storage.clone(), None, true),
            Some(StorageRoute::Endpoint(endpoint)) => (
                self.storage.clone(),
                Some(StorageContext::endpoint(endpoint)),
                false,
            ),
            Some(StorageRoute::EndpointWithParams { endpoint, params }) => {
                let mut storage_ctx = StorageContext::endpoint(endpoint);
                storage_ctx.params = params;
                (self.storage.clone(), Some(storage_ctx), false)
            }
            Some(StorageRoute::Storage { storage, endpoint }) => {
                (storage, endpoint.map(StorageContext::endpoint), false)
            }
        }
    }

    /// Inject `foreign_key == parent.id` for child lists.
    fn apply_parent_filters(&self, params: &mut ListParams, ctx: Option<&RequestContext>) {
        let Some(parent) = ctx.and_then(|c| c.direct_parent()) else {
            return;
        };
        let Some(decl) = self.def.parent_by_entity(&parent.entity) else {
            return;
        };
        params
            .filters
            .entry(decl.foreign_key.clone())
            .or_insert_with(|| json!(parent.id));
    }

    fn apply_defaults(&self, data: &mut Record, ctx: &RequestContext) {
        for (name, field) in &self.def.fields {
            if data.contains_key(name) {
                continue;
            }
            if let Some(default) = &field.default {
                data.insert(name.clone(), default.resolve(ctx));
            }
        }
        if let Some(parent) = ctx.direct_parent() {
            if let Some(decl) = self.def.parent_by_entity(&parent.entity) {
                data.entry(decl.foreign_key.clone())
                    .or_insert_with(|| json!(parent.id));
            }
        }
    }

    fn validate(&self, data: &Record, require_all: bool) -> Result<(), StorageError> {
        let mut errors = BTreeMap::new();
        for (name, field) in &self.def.fields {
            match data.get(name) {
                None | Some(Value::Null) => {
                    if require_all && field.required {
                        errors.insert(name.clone(), "required".to_string());
                    }
                }
                Some(value) => {
                    if let Some(validate) = &field.validate {
                        if let Err(message) = validate(value) {
                            errors.insert(name.clone(), message);
                        }
                    }
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StorageError::invalid_fields(
                format!("validation failed for '{}'", self.def.name),
                errors,
            ))
        }
    }

    /// Run presave hooks and hand back the (possibly adjusted) record.
    async fn presave(&self, payload: Value) -> Result<Record, StorageError> {
        let payload = self.run_lifecycle("presave", payload).await?;
        payload
            .get("record")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| StorageError::invalid("presave handlers removed the record"))
    }

    async fn after_write(
        &self,
        action: &str,
        result: &Record,
        is_new: bool,
    ) -> Result<(), StorageError> {
        self.invalidate_and_broadcast();
        let payload = json!({
            "entity": self.def.name,
            "record": result,
            "result": result,
            "isNew": is_new,
            "id": record_id(result, &self.def.id_field),
            "manager": self.def.name,
        });
        self.run_lifecycle("postsave", payload).await?;
        self.emit_entity_signal(action, Value::Object(result.clone()));
        Ok(())
    }

    async fn run_lifecycle(&self, stage: &str, payload: Value) -> Result<Value, StorageError> {
        let Some(services) = self.services.get() else {
            return Ok(payload);
        };
        let mut ctx = HookContext::new(payload);
        services
            .hooks
            .invoke(&format!("entity:{stage}"), &mut ctx)
            .await
            .map_err(hook_to_storage)?;
        services
            .hooks
            .invoke(&format!("{}:{stage}", self.def.name), &mut ctx)
            .await
            .map_err(hook_to_storage)?;
        Ok(ctx.data)
    }

    fn emit_entity_signal(&self, action: &str, data: Value) {
        if let Some(services) = self.services.get() {
            services.signals.emit_entity(&self.def.name, action, data);
        }
    }

    fn invalidate_and_broadcast(&self) {
        self.invalidate_cache();
        if let Some(services) = self.services.get() {
            services.signals.emit(
                &format!("cache:entity:invalidate:{}", self.def.name),
                json!({ "name": self.def.name, "reason": "write" }),
            );
        }
    }

    fn fill_cache(&self, result: &ListResult) {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        if result.total <= self.def.local_filter_threshold {
            *cache = CacheState::Filled {
                items: result.items.clone(),
                filled_at: Instant::now(),
            };
        } else {
            *cache = CacheState::Overflow {
                total: result.total,
            };
        }
    }

    /// Without `cache_safe`, filters on fields outside the schema cannot
    /// be evaluated offline and force storage delegation.
    fn filters_evaluable_locally(&self, params: &ListParams, options: QueryOptions) -> bool {
        if options.cache_safe {
            return true;
        }
        params
            .filters
            .keys()
            .all(|field| self.def.field(field).is_some() || field == &self.def.id_field)
    }

    async fn query_cache(&self, params: &ListParams) -> Option<QueryResult> {
        let items = match &*self.cache.lock().expect("cache lock poisoned") {
            CacheState::Filled { items, .. } => items.clone(),
            _ => return None,
        };

        let mut filtered: Vec<Record> = items
            .into_iter()
            .filter(|record| filtering::matches_filters(record, &params.filters))
            .collect();

        if let Some(term) = params.search.as_deref().filter(|t| !t.is_empty()) {
            let search_fields = self.storage.capabilities().search_fields;
            let mut kept = Vec::with_capacity(filtered.len());
            for record in filtered {
                if filtering::matches_search(&record, term, &search_fields)
                    || self.reference_label_matches(&record, term).await
                {
                    kept.push(record);
                }
            }
            filtered = kept;
        }

        let total = filtered.len() as u64;
        if let Some(sort_by) = &params.sort_by {
            filtering::sort_records(&mut filtered, sort_by, params.sort_order.unwrap_or_default());
        }
        let items = filtering::paginate(filtered, params.page, params.page_size);
        Some(QueryResult {
            items,
            total,
            from_cache: true,
        })
    }

    /// Local search across reference fields: match the referenced record's
    /// label out of the referenced manager's cache. Never touches storage.
    async fn reference_label_matches(&self, record: &Record, term: &str) -> bool {
        let Some(orchestrator) = self.orchestrator.get().and_then(Weak::upgrade) else {
            return false;
        };
        let term = term.to_lowercase();
        for (field_name, field) in &self.def.fields {
            let Some(target) = &field.reference else {
                continue;
            };
            let Some(id) = record.get(field_name).and_then(id_to_key) else {
                continue;
            };
            let Ok(referenced) = orchestrator.get(target).await else {
                continue;
            };
            if let Some(parent) = referenced.cached_record(&id) {
                if referenced.label_of(&parent).to_lowercase().contains(&term) {
                    return true;
                }
            }
        }
        false
    }
}

fn hook_to_storage(err: HookError) -> StorageError {
    match err {
        HookError::Veto(message) => StorageError::invalid(message),
        HookError::Failed(err) => StorageError::Backend(err),
    }
}

//! End-to-end manager behavior: cache policy, routing, hooks, permissions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use adminkit_core::{
    AccessOverrides, EntityDef, EntityManager, EntityRegistration, FieldDef, Orchestrator,
    QueryOptions, RequestContext, Services, StorageRoute,
};
use adminkit_hooks::{HookError, HookOptions, HookRegistry};
use adminkit_signals::{DeferredRegistry, SignalBus, SubscribeOptions};
use adminkit_storage::{
    ApiStorage, HttpClient, ListParams, MemoryStorage, Record, RequestOptions, StorageError,
    StorageResolver,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

fn record(value: Value) -> Record {
    value.as_object().unwrap().clone()
}

fn library_rows() -> Vec<Record> {
    vec![
        record(json!({"id": "1", "title": "The Hobbit", "author": "Tolkien"})),
        record(json!({"id": "2", "title": "The Silmarillion", "author": "Tolkien"})),
        record(json!({"id": "3", "title": "A Game of Thrones", "author": "Martin"})),
    ]
}

async fn wire(
    manager: EntityManager,
) -> (Arc<Orchestrator>, Arc<EntityManager>, SignalBus, HookRegistry) {
    let signals = SignalBus::new();
    let hooks = HookRegistry::new();
    let services = Services::new(
        signals.clone(),
        hooks.clone(),
        DeferredRegistry::with_signals(signals.clone()),
    );
    let orchestrator = Orchestrator::new(services, StorageResolver::new());
    let name = manager.name().to_string();
    orchestrator.declare(&name, EntityRegistration::Manager(Arc::new(manager)));
    let manager = orchestrator.get(&name).await.unwrap();
    (orchestrator, manager, signals, hooks)
}

fn books_manager() -> EntityManager {
    let def = EntityDef::new("books")
        .with_labels("Book", "Books")
        .with_label_field("title")
        .with_field("title", FieldDef::string().required())
        .with_field("author", FieldDef::string())
        .with_threshold(100);
    EntityManager::new(
        def,
        Arc::new(
            MemoryStorage::with_data("books", library_rows())
                .with_search_fields(&["title", "author"]),
        ),
    )
}

// ── Opportunistic cache ────────────────────────────────────────────────

#[tokio::test]
async fn cache_fills_serves_and_invalidates() {
    let (_orch, books, _signals, _hooks) = wire(books_manager()).await;

    // First unconstrained list fills the cache.
    let all = books.list(&ListParams::new(), None).await.unwrap();
    assert_eq!(all.total, 3);
    assert!(!all.from_cache);
    assert_eq!(books.cache_status(), "filled");

    // Filtered query is served locally.
    let tolkien = books
        .query(
            &ListParams::new().with_filter("author", json!("Tolkien")),
            QueryOptions::default(),
            None,
        )
        .await
        .unwrap();
    assert!(tolkien.from_cache);
    assert_eq!(tolkien.total, 2);
    let titles: Vec<&str> = tolkien
        .items
        .iter()
        .map(|r| r["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"The Hobbit"));
    assert!(titles.contains(&"The Silmarillion"));

    // A write invalidates; the next query re-fetches.
    books
        .create(
            record(json!({"title": "Z", "author": "Martin"})),
            None,
        )
        .await
        .unwrap();
    assert_eq!(books.cache_status(), "unfilled");

    let refreshed = books
        .query(&ListParams::new(), QueryOptions::default(), None)
        .await
        .unwrap();
    assert!(!refreshed.from_cache);
    assert_eq!(refreshed.total, 4);

    // The unconstrained re-fetch refilled the cache.
    assert_eq!(books.cache_status(), "filled");
    let cached_again = books
        .query(&ListParams::new(), QueryOptions::default(), None)
        .await
        .unwrap();
    assert!(cached_again.from_cache);
}

#[tokio::test]
async fn threshold_zero_disables_caching() {
    let def = EntityDef::new("books").with_threshold(0);
    let manager = EntityManager::new(
        def,
        Arc::new(MemoryStorage::with_data("books", library_rows())),
    );
    let (_orch, books, _signals, _hooks) = wire(manager).await;

    books.list(&ListParams::new(), None).await.unwrap();
    assert_eq!(books.cache_status(), "unfilled");

    let result = books
        .query(&ListParams::new(), QueryOptions::default(), None)
        .await
        .unwrap();
    assert!(!result.from_cache);
}

#[tokio::test]
async fn overflow_marks_cache_unusable() {
    let def = EntityDef::new("books").with_threshold(2);
    let manager = EntityManager::new(
        def,
        Arc::new(MemoryStorage::with_data("books", library_rows())),
    );
    let (_orch, books, _signals, _hooks) = wire(manager).await;

    books.list(&ListParams::new(), None).await.unwrap();
    assert_eq!(books.cache_status(), "overflow");

    let result = books
        .query(
            &ListParams::new().with_filter("author", json!("Tolkien")),
            QueryOptions::default(),
            None,
        )
        .await
        .unwrap();
    assert!(!result.from_cache, "overflow always delegates to storage");
}

#[tokio::test]
async fn unknown_filter_fields_bypass_cache_unless_cache_safe() {
    let (_orch, books, _signals, _hooks) = wire(books_manager()).await;
    books.list(&ListParams::new(), None).await.unwrap();

    let params = ListParams::new().with_filter("assigned_to_me", json!(true));
    let from_storage = books
        .query(&params, QueryOptions::default(), None)
        .await
        .unwrap();
    assert!(!from_storage.from_cache, "session-scoped filter needs the backend");

    let asserted = books
        .query(&params, QueryOptions { cache_safe: true }, None)
        .await
        .unwrap();
    assert!(asserted.from_cache);
    assert_eq!(asserted.total, 0, "no cached record carries that field");
}

#[tokio::test]
async fn local_search_uses_storage_search_fields() {
    let (_orch, books, _signals, _hooks) = wire(books_manager()).await;
    books.list(&ListParams::new(), None).await.unwrap();

    let hit = books
        .query(
            &ListParams::new().with_search("thrones"),
            QueryOptions::default(),
            None,
        )
        .await
        .unwrap();
    assert!(hit.from_cache);
    assert_eq!(hit.total, 1);
    assert_eq!(hit.items[0]["id"], "3");
}

#[tokio::test]
async fn local_search_matches_referenced_label() {
    // loans reference books; searching loans by book title must match via
    // the referenced record's label out of the books cache.
    let signals = SignalBus::new();
    let hooks = HookRegistry::new();
    let services = Services::new(
        signals.clone(),
        hooks.clone(),
        DeferredRegistry::with_signals(signals.clone()),
    );
    let orchestrator = Orchestrator::new(services, StorageResolver::new());

    orchestrator.declare(
        "books",
        EntityRegistration::Manager(Arc::new(books_manager())),
    );
    let loans_def = EntityDef::new("loans")
        .with_threshold(100)
        .with_field("book", FieldDef::reference("books"));
    let loans = EntityManager::new(
        loans_def,
        Arc::new(MemoryStorage::with_data(
            "loans",
            vec![
                record(json!({"id": "l1", "book": "1", "member": "ada"})),
                record(json!({"id": "l2", "book": "3", "member": "grace"})),
            ],
        )),
    );
    orchestrator.declare("loans", EntityRegistration::Manager(Arc::new(loans)));

    let books = orchestrator.get("books").await.unwrap();
    let loans = orchestrator.get("loans").await.unwrap();
    books.list(&ListParams::new(), None).await.unwrap();
    loans.list(&ListParams::new(), None).await.unwrap();

    let result = loans
        .query(
            &ListParams::new().with_search("hobbit"),
            QueryOptions::default(),
            None,
        )
        .await
        .unwrap();
    assert!(result.from_cache);
    assert_eq!(result.total, 1);
    assert_eq!(result.items[0]["id"], "l1");
}

// ── Multi-storage routing ──────────────────────────────────────────────

struct RecordingHttp {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingHttp {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }
}

#[async_trait]
impl HttpClient for RecordingHttp {
    async fn get(&self, url: &str, params: &Map<String, Value>) -> Result<Value, StorageError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Value::Object(params.clone())));
        Ok(json!({"items": [{"id": "t1", "title": "task"}], "total": 1}))
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, StorageError> {
        self.calls.lock().unwrap().push((url.to_string(), body.clone()));
        Ok(json!({"id": "t9"}))
    }

    async fn put(&self, url: &str, body: &Value) -> Result<Value, StorageError> {
        self.calls.lock().unwrap().push((url.to_string(), body.clone()));
        Ok(json!({"id": "t9"}))
    }

    async fn patch(&self, url: &str, body: &Value) -> Result<Value, StorageError> {
        self.calls.lock().unwrap().push((url.to_string(), body.clone()));
        Ok(json!({"id": "t9"}))
    }

    async fn delete(&self, url: &str) -> Result<Value, StorageError> {
        self.calls.lock().unwrap().push((url.to_string(), Value::Null));
        Ok(Value::Null)
    }

    async fn request(
        &self,
        _method: &str,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Value, StorageError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), options.body.clone().unwrap_or(Value::Null)));
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn parent_chain_routes_to_nested_endpoint_and_skips_cache() {
    let http = RecordingHttp::new();
    let def = EntityDef::new("tasks")
        .with_threshold(100)
        .with_parent("project", "projects", "project_id");
    let manager = EntityManager::new(
        def,
        Arc::new(ApiStorage::new("/api/tasks", http.clone())),
    )
    .with_router(|_method, ctx| {
        ctx.direct_parent()
            .filter(|p| p.entity == "projects")
            .map(|p| StorageRoute::Endpoint(format!("/api/projects/{}/tasks", p.id)))
    });
    let (_orch, tasks, _signals, _hooks) = wire(manager).await;

    let ctx = RequestContext::child_of("projects", "42");
    tasks.list(&ListParams::new(), Some(&ctx)).await.unwrap();
    assert_eq!(http.urls(), vec!["/api/projects/42/tasks"]);
    assert_eq!(
        tasks.cache_status(),
        "unfilled",
        "context-routed lists never fill the cache"
    );

    // The parent filter rides along even on the nested endpoint.
    let sent = http.calls.lock().unwrap().last().unwrap().1.clone();
    assert_eq!(sent["project_id"], "42");

    // Without context the default endpoint is used and the cache fills.
    tasks.list(&ListParams::new(), None).await.unwrap();
    assert_eq!(http.urls()[1], "/api/tasks");
    assert_eq!(tasks.cache_status(), "filled");

    // And a context-routed query must not consult that cache.
    let routed = tasks
        .query(&ListParams::new(), QueryOptions::default(), Some(&ctx))
        .await
        .unwrap();
    assert!(!routed.from_cache);
}

#[tokio::test]
async fn route_params_merge_with_request_params() {
    let http = RecordingHttp::new();
    let manager = EntityManager::new(
        EntityDef::new("tasks"),
        Arc::new(ApiStorage::new("/api/tasks", http.clone())),
    )
    .with_router(|_method, ctx| {
        ctx.direct_parent().map(|p| StorageRoute::EndpointWithParams {
            endpoint: format!("/api/projects/{}/tasks", p.id),
            params: json!({"archived": false, "page_size": 99})
                .as_object()
                .unwrap()
                .clone(),
        })
    });
    let (_orch, tasks, _signals, _hooks) = wire(manager).await;

    let ctx = RequestContext::child_of("projects", "7");
    tasks
        .list(&ListParams::new().with_page_size(10), Some(&ctx))
        .await
        .unwrap();

    let sent = http.calls.lock().unwrap()[0].1.clone();
    assert_eq!(sent["archived"], false);
    assert_eq!(sent["page_size"], 10, "request params win over route defaults");
}

// ── Hook pipeline around writes ────────────────────────────────────────

#[tokio::test]
async fn presave_handlers_run_in_composite_order() {
    let (_orch, books, _signals, hooks) = wire(books_manager()).await;
    let order = Arc::new(Mutex::new(Vec::new()));

    for (tag, options) in [
        ("a", HookOptions::priority(75).with_id("a")),
        ("b", HookOptions::default().with_id("b").with_after(&["a"])),
        ("c", HookOptions::default().with_id("c")),
    ] {
        let order = order.clone();
        hooks.on_invoke(
            "entity:presave",
            move |_ctx| {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(tag);
                    Ok(())
                })
            },
            options,
        );
    }

    books
        .create(record(json!({"title": "x"})), None)
        .await
        .unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["a", "c", "b"]);
}

#[tokio::test]
async fn presave_veto_aborts_write_and_emits_nothing() {
    let (_orch, books, signals, hooks) = wire(books_manager()).await;
    let later = Arc::new(AtomicUsize::new(0));
    let emitted = Arc::new(AtomicUsize::new(0));

    hooks.on_invoke(
        "entity:presave",
        |_ctx| Box::pin(async { Err(HookError::veto("quota exceeded")) }),
        HookOptions::priority(75).with_id("a"),
    );
    let l = later.clone();
    hooks.on_invoke(
        "entity:presave",
        move |_ctx| {
            let l = l.clone();
            Box::pin(async move {
                l.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        },
        HookOptions::default(),
    );
    let e = emitted.clone();
    signals.on(
        "books:*",
        move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        },
        SubscribeOptions::default(),
    );

    let err = books
        .create(record(json!({"title": "x"})), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput { .. }));
    assert_eq!(later.load(Ordering::SeqCst), 0, "remaining presave handlers skipped");
    assert_eq!(emitted.load(Ordering::SeqCst), 0, "no lifecycle signal after a veto");

    let unchanged = books.list(&ListParams::new(), None).await.unwrap();
    assert_eq!(unchanged.total, 3);
}

#[tokio::test]
async fn presave_may_adjust_the_record() {
    let (_orch, books, _signals, hooks) = wire(books_manager()).await;
    hooks.on_invoke(
        "books:presave",
        |ctx| {
            Box::pin(async move {
                ctx.data["record"]["title"] = json!("Adjusted");
                Ok(())
            })
        },
        HookOptions::default(),
    );

    let created = books
        .create(record(json!({"title": "Original"})), None)
        .await
        .unwrap();
    assert_eq!(created["title"], "Adjusted");
}

#[tokio::test]
async fn write_lifecycle_emits_specific_then_generic_signal() {
    let (_orch, books, signals, hooks) = wire(books_manager()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    hooks.on_invoke(
        "entity:postsave",
        move |_ctx| {
            let s = s.clone();
            Box::pin(async move {
                s.lock().unwrap().push("postsave".to_string());
                Ok(())
            })
        },
        HookOptions::default(),
    );
    for name in ["books:created", "entity:created"] {
        let s = seen.clone();
        signals.on(
            name,
            move |event| s.lock().unwrap().push(event.name.clone()),
            SubscribeOptions::default(),
        );
    }

    books
        .create(record(json!({"title": "x"})), None)
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["postsave", "books:created", "entity:created"],
        "no signal may be observed before postsave hooks have run"
    );
}

#[tokio::test]
async fn delete_runs_predelete_and_postdelete() {
    let (_orch, books, signals, hooks) = wire(books_manager()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    for stage in ["predelete", "postdelete"] {
        let s = seen.clone();
        hooks.on_invoke(
            &format!("books:{stage}"),
            move |ctx| {
                let s = s.clone();
                let stage = stage.to_string();
                Box::pin(async move {
                    assert_eq!(ctx.data["id"], "1");
                    s.lock().unwrap().push(stage);
                    Ok(())
                })
            },
            HookOptions::default(),
        );
    }
    let s = seen.clone();
    signals.on(
        "books:deleted",
        move |event| {
            assert_eq!(event.payload["data"]["id"], "1");
            s.lock().unwrap().push("signal".to_string());
        },
        SubscribeOptions::default(),
    );

    books.delete("1", None).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["predelete", "postdelete", "signal"]);
    assert!(matches!(
        books.get("1", None).await.unwrap_err(),
        StorageError::NotFound(_)
    ));
}

// ── Permission gate ────────────────────────────────────────────────────

struct GrantList(Vec<&'static str>);

impl adminkit_security::EntityAuth for GrantList {
    fn is_granted(&self, permission: &str, _record: Option<&Map<String, Value>>) -> bool {
        self.0.contains(&permission)
    }

    fn permissions(&self) -> Vec<String> {
        self.0.iter().map(|s| s.to_string()).collect()
    }
}

async fn wire_with_auth(
    manager: EntityManager,
    grants: Vec<&'static str>,
) -> (Arc<Orchestrator>, Arc<EntityManager>) {
    let signals = SignalBus::new();
    let services = Services::new(
        signals.clone(),
        HookRegistry::new(),
        DeferredRegistry::with_signals(signals),
    )
    .with_auth(Arc::new(GrantList(grants)));
    let orchestrator = Orchestrator::new(services, StorageResolver::new());
    let name = manager.name().to_string();
    orchestrator.declare(&name, EntityRegistration::Manager(Arc::new(manager)));
    let manager = orchestrator.get(&name).await.unwrap();
    (orchestrator, manager)
}

#[tokio::test]
async fn denied_actions_fail_with_unauthorized() {
    let (_orch, books) = wire_with_auth(books_manager(), vec!["entity:books:list"]).await;

    assert!(books.list(&ListParams::new(), None).await.is_ok());
    assert!(matches!(
        books.get("1", None).await.unwrap_err(),
        StorageError::Unauthorized(_)
    ));
    assert!(matches!(
        books
            .create(record(json!({"title": "x"})), None)
            .await
            .unwrap_err(),
        StorageError::Unauthorized(_)
    ));
    assert!(matches!(
        books.delete("1", None).await.unwrap_err(),
        StorageError::Unauthorized(_)
    ));
}

#[tokio::test]
async fn scope_whitelist_bypasses_the_gate() {
    let def = EntityDef::new("books")
        .with_field("title", FieldDef::string())
        .with_scope_whitelist(&["system"]);
    let manager = EntityManager::new(
        def,
        Arc::new(MemoryStorage::with_data("books", library_rows())),
    );
    let (_orch, books) = wire_with_auth(manager, vec![]).await;

    assert!(matches!(
        books.list(&ListParams::new(), None).await.unwrap_err(),
        StorageError::Unauthorized(_)
    ));

    let system = RequestContext::new().with_scope("system");
    assert!(books.list(&ListParams::new(), Some(&system)).await.is_ok());
}

#[tokio::test]
async fn overrides_replace_the_adapter_verdict() {
    let manager = books_manager().with_overrides(
        AccessOverrides::new().with_delete(|record| {
            record.map_or(false, |r| r.get("locked") != Some(&json!(true)))
        }),
    );
    // The adapter would grant the delete, but the override's verdict
    // replaces it: with no record to inspect it denies.
    let (_orch, books) = wire_with_auth(manager, vec!["entity:books:delete"]).await;
    assert!(matches!(
        books.delete("1", None).await.unwrap_err(),
        StorageError::Unauthorized(_)
    ));
}

#[tokio::test]
async fn read_only_entities_reject_writes() {
    let def = EntityDef::new("books").read_only();
    let manager = EntityManager::new(
        def,
        Arc::new(MemoryStorage::with_data("books", library_rows())),
    );
    let (_orch, books, _signals, _hooks) = wire(manager).await;

    assert!(books.list(&ListParams::new(), None).await.is_ok());
    let err = books
        .create(record(json!({"title": "x"})), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput { .. }));
    assert!(books.delete("1", None).await.is_err());
}

// ── Misc contract edges ────────────────────────────────────────────────

#[tokio::test]
async fn get_many_of_nothing_is_empty() {
    let (_orch, books, _signals, _hooks) = wire(books_manager()).await;
    let none: Vec<String> = Vec::new();
    assert!(books.get_many(&none).await.unwrap().is_empty());

    let some = books
        .get_many(&["1".to_string(), "3".to_string()])
        .await
        .unwrap();
    assert_eq!(some.len(), 2);
}

#[tokio::test]
async fn validation_failures_carry_field_messages() {
    let (_orch, books, _signals, _hooks) = wire(books_manager()).await;
    let err = books.create(Record::new(), None).await.unwrap_err();
    match err {
        StorageError::InvalidInput { fields, .. } => {
            assert_eq!(fields.get("title").map(String::as_str), Some("required"));
        }
        other => panic!("expected InvalidInput, got {other}"),
    }
}

#[tokio::test]
async fn update_and_patch_emit_updated() {
    let (_orch, books, signals, _hooks) = wire(books_manager()).await;
    let updates = Arc::new(AtomicUsize::new(0));
    let u = updates.clone();
    signals.on(
        "books:updated",
        move |_| {
            u.fetch_add(1, Ordering::SeqCst);
        },
        SubscribeOptions::default(),
    );

    books
        .update("1", record(json!({"title": "New Title"})), None)
        .await
        .unwrap();
    let patched = books
        .patch("1", record(json!({"author": "Anon"})), None)
        .await
        .unwrap();
    assert_eq!(patched["title"], "New Title");
    assert_eq!(updates.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn list_config_flows_through_alter_hooks() {
    let (_orch, books, _signals, hooks) = wire(books_manager()).await;
    hooks.on_alter(
        "books:list:alter",
        |data, _ctx| {
            let mut next = data.clone();
            Box::pin(async move {
                next["page_size"] = json!(25);
                Ok(Some(next))
            })
        },
        HookOptions::default(),
    );

    let config = books.list_config().await.unwrap();
    assert_eq!(config["entity"], "books");
    assert_eq!(config["columns"], json!(["title", "author"]));
    assert_eq!(config["page_size"], 25);
}

//! Config → adapter construction.
//!
//! Callers pass either an already-constructed adapter or an explicit
//! config record; there is no "looks like a storage" duck typing. Pattern
//! strings cover the common cases (`api:/api/books`, `local:books`,
//! `memory:books`, `mock:books`, `sdk:books`, bare `/path` defaulting to
//! `api`); the [`StorageResolver`] dispatches via a registry of
//! constructors that host apps can extend with new adapter types.

use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{ApiStorage, HttpClient};
use crate::error::StorageError;
use crate::kv::{KeyValueStore, MemoryKeyValueStore};
use crate::local::LocalStorage;
use crate::memory::MemoryStorage;
use crate::mock::MockApiStorage;
use crate::sdk::{SdkClient, SdkOperation, SdkStorage};
use crate::storage::{Record, Storage};

/// Storage configuration accepted by [`storage_factory`].
#[derive(Clone)]
pub enum StorageConfig {
    /// An already-constructed adapter, returned as-is (the factory is
    /// idempotent on instances).
    Instance(Arc<dyn Storage>),
    /// A `type:value` pattern, or a bare `/path` treated as `api`.
    Pattern(String),
    Api {
        endpoint: String,
    },
    Local {
        key: String,
    },
    Memory {
        name: String,
        initial: Vec<Record>,
    },
    Mock {
        entity: String,
        initial: Vec<Record>,
    },
    Sdk {
        endpoint: String,
    },
}

impl From<&str> for StorageConfig {
    fn from(raw: &str) -> Self {
        StorageConfig::Pattern(raw.to_string())
    }
}

impl From<Arc<dyn Storage>> for StorageConfig {
    fn from(storage: Arc<dyn Storage>) -> Self {
        StorageConfig::Instance(storage)
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageConfig::Instance(_) => f.write_str("Instance(..)"),
            StorageConfig::Pattern(p) => f.debug_tuple("Pattern").field(p).finish(),
            StorageConfig::Api { endpoint } => f.debug_struct("Api").field("endpoint", endpoint).finish(),
            StorageConfig::Local { key } => f.debug_struct("Local").field("key", key).finish(),
            StorageConfig::Memory { name, initial } => f
                .debug_struct("Memory")
                .field("name", name)
                .field("rows", &initial.len())
                .finish(),
            StorageConfig::Mock { entity, initial } => f
                .debug_struct("Mock")
                .field("entity", entity)
                .field("rows", &initial.len())
                .finish(),
            StorageConfig::Sdk { endpoint } => {
                f.debug_struct("Sdk").field("endpoint", endpoint).finish()
            }
        }
    }
}

/// Split a pattern string into `(type, value)`.
///
/// A bare `/path` defaults to `("api", "/path")`.
pub fn parse_pattern(raw: &str) -> Result<(String, String), StorageError> {
    if raw.starts_with('/') {
        return Ok(("api".to_string(), raw.to_string()));
    }
    match raw.split_once(':') {
        Some((kind, value)) if !kind.is_empty() && !value.is_empty() => {
            Ok((kind.to_string(), value.to_string()))
        }
        _ => Err(StorageError::invalid(format!(
            "unparseable storage pattern '{raw}'"
        ))),
    }
}

type ConstructorFn = Arc<
    dyn Fn(&StorageResolver, &str, &str) -> Result<Arc<dyn Storage>, StorageError> + Send + Sync,
>;

/// Ambient services plus the type → constructor registry.
#[derive(Clone)]
pub struct StorageResolver {
    http: Option<Arc<dyn HttpClient>>,
    sdk: Option<Arc<dyn SdkClient>>,
    kv: Arc<dyn KeyValueStore>,
    constructors: HashMap<String, ConstructorFn>,
}

impl Default for StorageResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageResolver {
    /// The stock resolver: `api`, `local`, `memory`, `mock`, and `sdk`
    /// types over an in-process key–value store. `api:` patterns need an
    /// HTTP client ([`with_http`](Self::with_http)) and `sdk:` patterns an
    /// SDK client ([`with_sdk`](Self::with_sdk)); without one the
    /// construction fails with an explanatory `InvalidInput`.
    ///
    /// An `sdk:<endpoint>` pattern maps the CRUD operations onto dotted
    /// SDK method names derived from the endpoint: `sdk:books` calls
    /// `books.list`, `books.get`, and so on. Bindings with their own
    /// method names or transforms construct [`SdkStorage`] directly and
    /// pass it as an instance.
    pub fn new() -> Self {
        let mut resolver = Self {
            http: None,
            sdk: None,
            kv: Arc::new(MemoryKeyValueStore::new()),
            constructors: HashMap::new(),
        };
        resolver.register("api", |resolver, endpoint, _entity| {
            let http = resolver.http.clone().ok_or_else(|| {
                StorageError::invalid("api storage requires an HTTP client on the resolver")
            })?;
            Ok(Arc::new(ApiStorage::new(endpoint, http)))
        });
        resolver.register("local", |resolver, key, _entity| {
            Ok(Arc::new(LocalStorage::new(key, resolver.kv.clone())))
        });
        resolver.register("memory", |_resolver, name, _entity| {
            Ok(Arc::new(MemoryStorage::new(name)))
        });
        resolver.register("mock", |resolver, name, _entity| {
            Ok(Arc::new(MockApiStorage::new(name, resolver.kv.clone())))
        });
        resolver.register("sdk", |resolver, endpoint, _entity| {
            let sdk = resolver.sdk.clone().ok_or_else(|| {
                StorageError::invalid("sdk storage requires an SDK client on the resolver")
            })?;
            let prefix = endpoint.trim_matches('/').replace('/', ".");
            let mut storage = SdkStorage::new(sdk);
            for op in ["list", "get", "create", "update", "patch", "delete"] {
                storage = storage.with_operation(op, SdkOperation::method(format!("{prefix}.{op}")));
            }
            Ok(Arc::new(storage))
        });
        resolver
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_sdk(mut self, sdk: Arc<dyn SdkClient>) -> Self {
        self.sdk = Some(sdk);
        self
    }

    pub fn with_kv(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = kv;
        self
    }

    pub fn http(&self) -> Option<Arc<dyn HttpClient>> {
        self.http.clone()
    }

    pub fn sdk(&self) -> Option<Arc<dyn SdkClient>> {
        self.sdk.clone()
    }

    pub fn kv(&self) -> Arc<dyn KeyValueStore> {
        self.kv.clone()
    }

    /// Register (or override) a constructor for a pattern type.
    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&StorageResolver, &str, &str) -> Result<Arc<dyn Storage>, StorageError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(kind.to_string(), Arc::new(constructor));
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    fn construct(
        &self,
        kind: &str,
        value: &str,
        entity: &str,
    ) -> Result<Arc<dyn Storage>, StorageError> {
        let constructor = self.constructors.get(kind).ok_or_else(|| {
            StorageError::invalid(format!("unknown storage type '{kind}'"))
        })?;
        constructor(self, value, entity)
    }
}

/// Turn a [`StorageConfig`] into an adapter.
///
/// Idempotent on instances: feeding a produced `Arc<dyn Storage>` back in
/// returns the same instance.
pub fn storage_factory(
    config: StorageConfig,
    entity_name: &str,
    resolver: &StorageResolver,
) -> Result<Arc<dyn Storage>, StorageError> {
    match config {
        StorageConfig::Instance(storage) => Ok(storage),
        StorageConfig::Pattern(raw) => {
            let (kind, value) = parse_pattern(&raw)?;
            resolver.construct(&kind, &value, entity_name)
        }
        StorageConfig::Api { endpoint } => resolver.construct("api", &endpoint, entity_name),
        StorageConfig::Local { key } => resolver.construct("local", &key, entity_name),
        StorageConfig::Memory { name, initial } => {
            Ok(Arc::new(MemoryStorage::with_data(name, initial)))
        }
        StorageConfig::Mock { entity, initial } => Ok(Arc::new(
            MockApiStorage::new(entity, resolver.kv()).with_initial_data(initial),
        )),
        StorageConfig::Sdk { endpoint } => resolver.construct("sdk", &endpoint, entity_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ListParams;
    use serde_json::json;

    #[test]
    fn patterns_parse() {
        assert_eq!(
            parse_pattern("api:/api/books").unwrap(),
            ("api".to_string(), "/api/books".to_string())
        );
        assert_eq!(
            parse_pattern("local:books").unwrap(),
            ("local".to_string(), "books".to_string())
        );
        assert_eq!(
            parse_pattern("/api/books").unwrap(),
            ("api".to_string(), "/api/books".to_string())
        );
        assert!(parse_pattern("books").is_err());
        assert!(parse_pattern(":x").is_err());
    }

    #[tokio::test]
    async fn builds_in_process_adapters() {
        let resolver = StorageResolver::new();
        let storage = storage_factory("memory:books".into(), "books", &resolver).unwrap();
        assert_eq!(storage.list(&ListParams::new(), None).await.unwrap().total, 0);

        let storage = storage_factory("mock:books".into(), "books", &resolver).unwrap();
        assert!(storage.capabilities().supports_caching);

        let storage = storage_factory("local:books".into(), "books", &resolver).unwrap();
        assert!(storage.capabilities().supports_filters);
    }

    #[test]
    fn api_pattern_requires_http_client() {
        let resolver = StorageResolver::new();
        let err = storage_factory("api:/api/books".into(), "books", &resolver).unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput { .. }));
    }

    #[test]
    fn sdk_pattern_requires_sdk_client() {
        let resolver = StorageResolver::new();
        let err = storage_factory("sdk:books".into(), "books", &resolver).unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn sdk_pattern_maps_crud_onto_dotted_methods() {
        use crate::sdk::SdkClient;
        use async_trait::async_trait;
        use std::sync::Mutex;

        struct FakeSdk {
            calls: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl SdkClient for FakeSdk {
            async fn call(
                &self,
                method: &str,
                _params: serde_json::Value,
            ) -> Result<serde_json::Value, StorageError> {
                self.calls.lock().unwrap().push(method.to_string());
                Ok(json!({"data": {"items": [], "total": 0}}))
            }
        }

        let sdk = Arc::new(FakeSdk {
            calls: Mutex::new(Vec::new()),
        });
        let resolver = StorageResolver::new().with_sdk(sdk.clone());

        let storage = storage_factory("sdk:books".into(), "books", &resolver).unwrap();
        storage.list(&ListParams::new(), None).await.unwrap();
        assert_eq!(*sdk.calls.lock().unwrap(), vec!["books.list".to_string()]);

        // Path-shaped endpoints flatten into the dotted prefix.
        let storage = storage_factory(
            StorageConfig::Sdk {
                endpoint: "/library/books".into(),
            },
            "books",
            &resolver,
        )
        .unwrap();
        storage.list(&ListParams::new(), None).await.unwrap();
        assert_eq!(sdk.calls.lock().unwrap()[1], "library.books.list");
    }

    #[test]
    fn factory_is_idempotent_on_instances() {
        let resolver = StorageResolver::new();
        let first = storage_factory("memory:books".into(), "books", &resolver).unwrap();
        let again = storage_factory(StorageConfig::Instance(first.clone()), "books", &resolver)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[tokio::test]
    async fn mock_config_seeds_via_shared_kv() {
        let resolver = StorageResolver::new();
        let storage = storage_factory(
            StorageConfig::Mock {
                entity: "books".into(),
                initial: vec![json!({"id": "1"}).as_object().unwrap().clone()],
            },
            "books",
            &resolver,
        )
        .unwrap();
        assert_eq!(storage.list(&ListParams::new(), None).await.unwrap().total, 1);
        assert!(resolver.kv().get("mockapi:books:data").is_some());
    }

    #[tokio::test]
    async fn custom_types_extend_the_resolver() {
        let mut resolver = StorageResolver::new();
        resolver.register("fixture", |_resolver, value, entity| {
            Ok(Arc::new(MemoryStorage::with_data(
                format!("{entity}:{value}"),
                vec![json!({"id": "seeded"}).as_object().unwrap().clone()],
            )))
        });

        let storage = storage_factory("fixture:smoke".into(), "books", &resolver).unwrap();
        assert_eq!(storage.list(&ListParams::new(), None).await.unwrap().total, 1);
    }

    #[test]
    fn unknown_type_is_invalid_input() {
        let resolver = StorageResolver::new();
        let err = storage_factory("carrier-pigeon:coop".into(), "books", &resolver).unwrap_err();
        assert!(err.to_string().contains("unknown storage type"));
    }
}

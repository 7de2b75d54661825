//! Session-expiry plumbing at the HTTP client seam.

use std::sync::Arc;

use adminkit_signals::SignalBus;
use adminkit_storage::{HttpClient, RequestOptions, StorageError};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Wraps any [`HttpClient`] and turns `Unauthorized` responses into an
/// `auth:expired` emission — except on the login endpoint, whose failures
/// belong to the login flow (`auth:login:error`) and must never read as
/// an expired session.
///
/// The error still propagates to the caller either way; the signal is the
/// cross-cutting side channel the kernel's default expiry handler listens
/// on.
pub struct ExpiryAwareClient {
    inner: Arc<dyn HttpClient>,
    signals: SignalBus,
    login_path: String,
}

impl ExpiryAwareClient {
    pub fn new(inner: Arc<dyn HttpClient>, signals: SignalBus, login_path: impl Into<String>) -> Self {
        Self {
            inner,
            signals,
            login_path: login_path.into(),
        }
    }

    fn observe<T>(&self, url: &str, result: Result<T, StorageError>) -> Result<T, StorageError> {
        if let Err(StorageError::Unauthorized(message)) = &result {
            if !url.starts_with(&self.login_path) {
                self.signals.emit(
                    "auth:expired",
                    json!({ "status": 401, "url": url, "message": message }),
                );
            }
        }
        result
    }
}

#[async_trait]
impl HttpClient for ExpiryAwareClient {
    async fn get(&self, url: &str, params: &Map<String, Value>) -> Result<Value, StorageError> {
        let result = self.inner.get(url, params).await;
        self.observe(url, result)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, StorageError> {
        let result = self.inner.post(url, body).await;
        self.observe(url, result)
    }

    async fn put(&self, url: &str, body: &Value) -> Result<Value, StorageError> {
        let result = self.inner.put(url, body).await;
        self.observe(url, result)
    }

    async fn patch(&self, url: &str, body: &Value) -> Result<Value, StorageError> {
        let result = self.inner.patch(url, body).await;
        self.observe(url, result)
    }

    async fn delete(&self, url: &str) -> Result<Value, StorageError> {
        let result = self.inner.delete(url).await;
        self.observe(url, result)
    }

    async fn request(
        &self,
        method: &str,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Value, StorageError> {
        let result = self.inner.request(method, url, options).await;
        self.observe(url, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adminkit_signals::SubscribeOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysUnauthorized;

    #[async_trait]
    impl HttpClient for AlwaysUnauthorized {
        async fn get(&self, _url: &str, _params: &Map<String, Value>) -> Result<Value, StorageError> {
            Err(StorageError::Unauthorized("token expired".into()))
        }

        async fn post(&self, _url: &str, _body: &Value) -> Result<Value, StorageError> {
            Err(StorageError::Unauthorized("token expired".into()))
        }

        async fn put(&self, _url: &str, _body: &Value) -> Result<Value, StorageError> {
            Err(StorageError::Unauthorized("token expired".into()))
        }

        async fn patch(&self, _url: &str, _body: &Value) -> Result<Value, StorageError> {
            Err(StorageError::Unauthorized("token expired".into()))
        }

        async fn delete(&self, _url: &str) -> Result<Value, StorageError> {
            Err(StorageError::Unauthorized("token expired".into()))
        }

        async fn request(
            &self,
            _method: &str,
            _url: &str,
            _options: &RequestOptions,
        ) -> Result<Value, StorageError> {
            Err(StorageError::Unauthorized("token expired".into()))
        }
    }

    #[tokio::test]
    async fn unauthorized_outside_login_emits_expired() {
        let signals = SignalBus::new();
        let expired = Arc::new(AtomicUsize::new(0));
        let e = expired.clone();
        signals.on(
            "auth:expired",
            move |event| {
                assert_eq!(event.payload["url"], "/api/books");
                e.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );

        let client =
            ExpiryAwareClient::new(Arc::new(AlwaysUnauthorized), signals, "/api/auth/login");
        let err = client.get("/api/books", &Map::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::Unauthorized(_)));
        assert_eq!(expired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn login_failures_never_read_as_expiry() {
        let signals = SignalBus::new();
        let expired = Arc::new(AtomicUsize::new(0));
        let e = expired.clone();
        signals.on(
            "auth:expired",
            move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );

        let client =
            ExpiryAwareClient::new(Arc::new(AlwaysUnauthorized), signals, "/api/auth/login");
        let err = client
            .post("/api/auth/login", &json!({"username": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unauthorized(_)));
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }
}

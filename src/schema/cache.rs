//! Two-tier schema cache: in-process map first, optional external backend second.
//!
//! Cache entries are pure functions of immutable schema source data, so
//! concurrent writers racing on `put` are harmless. External backend outages
//! are never fatal; the cache degrades to the in-process tier.

use crate::schema::context::Context;
use crate::schema::resolved::Schema;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Optional external cache tier (e.g. Redis behind the caller's client).
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), CacheBackendError>;
    async fn delete(&self, key: &str) -> Result<(), CacheBackendError>;
}

#[derive(Debug, thiserror::Error)]
#[error("cache backend: {0}")]
pub struct CacheBackendError(pub String);

pub struct SchemaCache {
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
    views: RwLock<HashMap<(String, Context), Arc<Value>>>,
    backend: Option<Arc<dyn CacheBackend>>,
}

const ALL_CONTEXTS: [Context; 5] = [
    Context::List,
    Context::Form,
    Context::Detail,
    Context::Meta,
    Context::Full,
];

impl SchemaCache {
    pub fn in_process() -> Self {
        SchemaCache {
            schemas: RwLock::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
            backend: None,
        }
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        SchemaCache {
            schemas: RwLock::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
            backend: Some(backend),
        }
    }

    fn backend_key(model: &str, context: Context) -> String {
        format!("crudkit:schema:{}:{}", model, context.as_str())
    }

    /// Resolved schemas live in the in-process tier only; they are cheap to
    /// recompute and not serialization-stable across versions.
    pub fn get_schema(&self, model: &str) -> Option<Arc<Schema>> {
        self.schemas.read().ok()?.get(model).cloned()
    }

    pub fn put_schema(&self, model: &str, schema: Arc<Schema>) {
        if let Ok(mut map) = self.schemas.write() {
            map.insert(model.to_string(), schema);
        }
    }

    pub async fn get_view(&self, model: &str, context: Context) -> Option<Arc<Value>> {
        if let Ok(map) = self.views.read() {
            if let Some(v) = map.get(&(model.to_string(), context)) {
                return Some(v.clone());
            }
        }
        let backend = self.backend.as_ref()?;
        match backend.get(&Self::backend_key(model, context)).await {
            Ok(Some(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(v) => {
                    let v = Arc::new(v);
                    if let Ok(mut map) = self.views.write() {
                        map.insert((model.to_string(), context), v.clone());
                    }
                    Some(v)
                }
                Err(e) => {
                    tracing::warn!(model = %model, context = %context.as_str(), error = %e,
                        "discarding unparseable external cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(model = %model, context = %context.as_str(), error = %e,
                    "external cache unavailable; serving without it");
                None
            }
        }
    }

    pub async fn put_view(&self, model: &str, context: Context, view: Arc<Value>) {
        if let Ok(mut map) = self.views.write() {
            map.insert((model.to_string(), context), view.clone());
        }
        if let Some(backend) = &self.backend {
            let text = view.to_string();
            if let Err(e) = backend.put(&Self::backend_key(model, context), &text).await {
                tracing::warn!(model = %model, context = %context.as_str(), error = %e,
                    "external cache write failed; in-process entry kept");
            }
        }
    }

    /// Drop every cache line for a model, in both tiers.
    pub async fn invalidate(&self, model: &str) {
        if let Ok(mut map) = self.schemas.write() {
            map.remove(model);
        }
        if let Ok(mut map) = self.views.write() {
            map.retain(|(m, _), _| m != model);
        }
        if let Some(backend) = &self.backend {
            for context in ALL_CONTEXTS {
                if let Err(e) = backend.delete(&Self::backend_key(model, context)).await {
                    tracing::warn!(model = %model, context = %context.as_str(), error = %e,
                        "external cache invalidation failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Backend double: either an in-memory map or permanently failing.
    struct MapBackend {
        entries: Mutex<HashMap<String, String>>,
        fail: bool,
    }

    impl MapBackend {
        fn healthy() -> Self {
            MapBackend {
                entries: Mutex::new(HashMap::new()),
                fail: false,
            }
        }

        fn broken() -> Self {
            MapBackend {
                entries: Mutex::new(HashMap::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl CacheBackend for MapBackend {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError> {
            if self.fail {
                return Err(CacheBackendError("connection refused".into()));
            }
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn put(&self, key: &str, value: &str) -> Result<(), CacheBackendError> {
            if self.fail {
                return Err(CacheBackendError("connection refused".into()));
            }
            self.entries.lock().unwrap().insert(key.into(), value.into());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CacheBackendError> {
            if self.fail {
                return Err(CacheBackendError("connection refused".into()));
            }
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn context_entries_are_independent_cache_lines() {
        let cache = SchemaCache::in_process();
        cache
            .put_view("user", Context::List, Arc::new(json!({"v": "list"})))
            .await;
        assert!(cache.get_view("user", Context::List).await.is_some());
        assert!(cache.get_view("user", Context::Detail).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_clears_all_contexts_for_model_only() {
        let cache = SchemaCache::in_process();
        cache.put_view("user", Context::List, Arc::new(json!(1))).await;
        cache.put_view("user", Context::Form, Arc::new(json!(2))).await;
        cache.put_view("role", Context::List, Arc::new(json!(3))).await;
        cache.invalidate("user").await;
        assert!(cache.get_view("user", Context::List).await.is_none());
        assert!(cache.get_view("user", Context::Form).await.is_none());
        assert!(cache.get_view("role", Context::List).await.is_some());
    }

    #[tokio::test]
    async fn external_tier_serves_after_in_process_miss() {
        let backend = Arc::new(MapBackend::healthy());
        let warm = SchemaCache::with_backend(backend.clone());
        warm.put_view("user", Context::Meta, Arc::new(json!({"model": "user"})))
            .await;

        // fresh in-process tier, same backend: simulates a new process
        let cold = SchemaCache::with_backend(backend);
        let hit = cold.get_view("user", Context::Meta).await.unwrap();
        assert_eq!(hit["model"], "user");
    }

    #[tokio::test]
    async fn broken_backend_is_non_fatal() {
        let cache = SchemaCache::with_backend(Arc::new(MapBackend::broken()));
        cache.put_view("user", Context::List, Arc::new(json!(1))).await;
        // in-process tier still serves
        assert!(cache.get_view("user", Context::List).await.is_some());
        cache.invalidate("user").await;
        assert!(cache.get_view("user", Context::List).await.is_none());
    }
}

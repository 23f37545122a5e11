//! Schema registry: load, normalize, resolve, cache, and serve context views.
//!
//! An explicit service instance passed by the caller; never a process-wide
//! singleton.

use crate::error::EngineError;
use crate::schema::cache::SchemaCache;
use crate::schema::context::{self, Context};
use crate::schema::normalize::normalize;
use crate::schema::resolved::{resolve, Schema};
use crate::schema::store::SchemaStore;
use serde_json::Value;
use std::sync::Arc;

pub struct SchemaRegistry {
    store: SchemaStore,
    cache: SchemaCache,
}

impl SchemaRegistry {
    pub fn new(store: SchemaStore, cache: SchemaCache) -> Self {
        SchemaRegistry { store, cache }
    }

    /// Full resolved schema for data operations (model configuration, query
    /// building, relationship processing). Cached per process.
    pub fn schema(&self, model: &str) -> Result<Arc<Schema>, EngineError> {
        if let Some(schema) = self.cache.get_schema(model) {
            return Ok(schema);
        }
        let doc = self.store.load(model)?;
        let schema = Arc::new(resolve(normalize(doc))?);
        self.cache.put_schema(model, schema.clone());
        tracing::info!(model = %model, table = %schema.table, "schema resolved");
        Ok(schema)
    }

    /// Context-filtered view, served through the two-tier cache.
    pub async fn view(&self, model: &str, context: Context) -> Result<Arc<Value>, EngineError> {
        if let Some(view) = self.cache.get_view(model, context).await {
            return Ok(view);
        }
        let schema = self.schema(model)?;
        let view = Arc::new(context::view(&schema, context));
        self.cache.put_view(model, context, view.clone()).await;
        Ok(view)
    }

    /// Detail view with related schemas eagerly embedded when requested, so
    /// clients can render child listings without extra round trips.
    pub async fn view_detail(&self, model: &str, include_related: bool) -> Result<Value, EngineError> {
        let view = self.view(model, Context::Detail).await?;
        if !include_related {
            return Ok(view.as_ref().clone());
        }
        let schema = self.schema(model)?;
        let mut related = serde_json::Map::new();
        let mut names: Vec<String> = schema
            .relationships
            .iter()
            .filter_map(|r| r.related_model.clone())
            .collect();
        names.extend(schema.details.iter().map(|d| d.model.clone()));
        names.sort();
        names.dedup();
        for name in names {
            if name == model {
                continue;
            }
            match self.view(&name, Context::List).await {
                Ok(v) => {
                    related.insert(name, v.as_ref().clone());
                }
                Err(e) => {
                    // A misconfigured related model must not break the main view.
                    tracing::warn!(model = %model, related = %name, error = %e,
                        "skipping related schema");
                }
            }
        }
        let mut out = view.as_ref().clone();
        if let Value::Object(map) = &mut out {
            map.insert("related_schemas".into(), Value::Object(related));
        }
        Ok(out)
    }

    /// Drop cached entries and load fresh from the store.
    pub async fn reload(&self, model: &str) -> Result<Arc<Schema>, EngineError> {
        self.cache.invalidate(model).await;
        self.schema(model)
    }
}

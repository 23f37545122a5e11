//! Schema resource loading: one JSON document per model.
//!
//! A pure read layer; caching is the registry's job.

use crate::error::{EngineError, SchemaError};
use crate::schema::resolved::is_valid_identifier;
use crate::schema::types::SchemaDocument;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Where schema documents come from: a directory of `{model}.json` files, or
/// an in-memory map for tests and embedded configuration.
#[derive(Clone, Debug)]
pub enum SchemaSource {
    Directory(PathBuf),
    Memory(HashMap<String, Value>),
}

#[derive(Clone, Debug)]
pub struct SchemaStore {
    source: SchemaSource,
}

impl SchemaStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        SchemaStore {
            source: SchemaSource::Directory(dir.into()),
        }
    }

    pub fn from_memory(documents: HashMap<String, Value>) -> Self {
        SchemaStore {
            source: SchemaSource::Memory(documents),
        }
    }

    /// Load the raw document for a model. Applies serde-level defaults
    /// (timestamps true, soft_delete false, primary key "id") and fails fast
    /// on structurally malformed documents.
    pub fn load(&self, model: &str) -> Result<SchemaDocument, EngineError> {
        // The model name becomes part of a file path; reject anything outside
        // the identifier allow-list before touching the filesystem.
        if !is_valid_identifier(model) {
            return Err(SchemaError::InvalidIdentifier {
                model: model.to_string(),
                kind: "model",
                ident: model.to_string(),
            }
            .into());
        }
        let raw = match &self.source {
            SchemaSource::Directory(dir) => {
                let path = dir.join(format!("{}.json", model));
                if !path.is_file() {
                    return Err(EngineError::NotFound(format!("schema '{}'", model)));
                }
                let text = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
                    model: model.to_string(),
                    source,
                })?;
                serde_json::from_str::<Value>(&text).map_err(|source| SchemaError::Parse {
                    model: model.to_string(),
                    source,
                })?
            }
            SchemaSource::Memory(map) => map
                .get(model)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("schema '{}'", model)))?,
        };

        let doc: SchemaDocument =
            serde_json::from_value(raw).map_err(|source| SchemaError::Parse {
                model: model.to_string(),
                source,
            })?;
        if doc.model != model {
            return Err(SchemaError::ModelMismatch {
                model: model.to_string(),
                declared: doc.model,
            }
            .into());
        }
        if doc.fields.is_empty() {
            return Err(SchemaError::MissingKey {
                model: model.to_string(),
                key: "fields",
            }
            .into());
        }
        tracing::debug!(model = %model, "schema document loaded");
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(model: &str, doc: Value) -> SchemaStore {
        SchemaStore::from_memory(HashMap::from([(model.to_string(), doc)]))
    }

    #[test]
    fn applies_document_defaults() {
        let store = store_with(
            "group",
            json!({
                "model": "group",
                "table": "groups",
                "fields": {"id": {"type": "integer"}}
            }),
        );
        let doc = store.load("group").unwrap();
        assert_eq!(doc.primary_key, "id");
        assert!(doc.timestamps);
        assert!(!doc.soft_delete);
    }

    #[test]
    fn unknown_model_is_not_found() {
        let store = store_with("group", json!({}));
        assert!(matches!(store.load("nope"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn field_without_type_is_malformed() {
        let store = store_with(
            "group",
            json!({
                "model": "group",
                "table": "groups",
                "fields": {"id": {}}
            }),
        );
        assert!(matches!(
            store.load("group"),
            Err(EngineError::Malformed(SchemaError::Parse { .. }))
        ));
    }

    #[test]
    fn missing_table_is_malformed() {
        let store = store_with("group", json!({"model": "group", "fields": {"id": {"type": "integer"}}}));
        assert!(matches!(
            store.load("group"),
            Err(EngineError::Malformed(SchemaError::Parse { .. }))
        ));
    }

    #[test]
    fn empty_field_map_is_malformed() {
        let store = store_with("group", json!({"model": "group", "table": "groups", "fields": {}}));
        assert!(matches!(
            store.load("group"),
            Err(EngineError::Malformed(SchemaError::MissingKey { key: "fields", .. }))
        ));
    }

    #[test]
    fn model_name_mismatch_is_malformed() {
        let store = store_with(
            "group",
            json!({"model": "user", "table": "groups", "fields": {"id": {"type": "integer"}}}),
        );
        assert!(matches!(
            store.load("group"),
            Err(EngineError::Malformed(SchemaError::ModelMismatch { .. }))
        ));
    }

    #[test]
    fn hostile_model_name_never_touches_disk() {
        let store = SchemaStore::from_dir("/nonexistent");
        assert!(matches!(
            store.load("../etc/passwd"),
            Err(EngineError::Malformed(SchemaError::InvalidIdentifier { .. }))
        ));
    }
}

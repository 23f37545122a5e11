//! Dynamic model configuration: table, connection, fillable set, casts, and
//! soft-delete column, derived purely from a resolved schema. Replaces one
//! hand-written model type per table.

use crate::error::EngineError;
use crate::schema::resolved::Schema;
use crate::schema::types::FieldType;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::HashMap;

pub const SOFT_DELETE_COLUMN: &str = "deleted_at";

/// Soft-delete visibility for read paths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeletedScope {
    /// Hide soft-deleted rows (the default).
    #[default]
    Exclude,
    /// Return live and soft-deleted rows alike.
    Include,
    /// Return soft-deleted rows only, e.g. for a trash listing.
    Only,
}

impl DeletedScope {
    pub fn parse(s: &str) -> Option<DeletedScope> {
        match s {
            "exclude" => Some(DeletedScope::Exclude),
            "include" => Some(DeletedScope::Include),
            "only" => Some(DeletedScope::Only),
            _ => None,
        }
    }
}
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub type_: Option<FieldType>,
    pub fillable: bool,
    /// SQL cast suffix for bound parameters (e.g. "timestamptz"), when the
    /// bound JSON value needs a server-side conversion.
    pub pg_cast: Option<&'static str>,
}

/// Runtime handle for one table, configured from schema data.
#[derive(Clone, Debug)]
pub struct ModelHandle {
    pub model: String,
    pub table: String,
    /// None means the default connection.
    pub connection: Option<String>,
    pub primary_key: String,
    pub timestamps: bool,
    /// Present only when the schema enables soft deletion; the engine never
    /// touches a delete-timestamp column otherwise.
    pub soft_delete_column: Option<String>,
    pub columns: Vec<ColumnInfo>,
}

impl ModelHandle {
    pub fn configure(schema: &Schema) -> ModelHandle {
        let mut columns: Vec<ColumnInfo> = schema
            .fields
            .iter()
            .map(|f| ColumnInfo {
                name: f.name.clone(),
                type_: Some(f.type_),
                // The primary key is never mass-assignable, whatever its type.
                fillable: f.is_fillable() && f.name != schema.primary_key,
                pg_cast: cast_for(f.type_),
            })
            .collect();

        if schema.timestamps {
            for name in [CREATED_AT_COLUMN, UPDATED_AT_COLUMN] {
                if !columns.iter().any(|c| c.name == name) {
                    columns.push(timestamp_column(name));
                }
            }
        }
        let mut soft_delete_column = None;
        if schema.soft_delete {
            if !columns.iter().any(|c| c.name == SOFT_DELETE_COLUMN) {
                columns.push(timestamp_column(SOFT_DELETE_COLUMN));
            }
            soft_delete_column = Some(SOFT_DELETE_COLUMN.to_string());
        }

        ModelHandle {
            model: schema.model.clone(),
            table: schema.table.clone(),
            connection: schema.connection.clone(),
            primary_key: schema.primary_key.clone(),
            timestamps: schema.timestamps,
            soft_delete_column,
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn fillable_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.fillable)
    }

    /// Filter a request body down to the mass-assignable set and coerce each
    /// value per the field's declared type. Unknown and non-fillable keys are
    /// dropped, not errors: callers may post echo-back payloads.
    pub fn coerce(
        &self,
        body: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, EngineError> {
        let mut out = HashMap::with_capacity(body.len());
        for col in self.fillable_columns() {
            if let Some(v) = body.get(&col.name) {
                out.insert(col.name.clone(), coerce_value(&self.model, col, v)?);
            }
        }
        Ok(out)
    }
}

fn timestamp_column(name: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        type_: Some(FieldType::Datetime),
        fillable: false,
        pg_cast: Some("timestamptz"),
    }
}

/// Cast suffixes for parameter binding; string-family types bind as-is.
fn cast_for(t: FieldType) -> Option<&'static str> {
    match t {
        FieldType::Date => Some("date"),
        FieldType::Datetime => Some("timestamptz"),
        FieldType::Json => Some("jsonb"),
        FieldType::String
        | FieldType::Text
        | FieldType::Integer
        | FieldType::Float
        | FieldType::Boolean
        | FieldType::Password
        | FieldType::Lookup => None,
    }
}

fn coerce_value(model: &str, col: &ColumnInfo, v: &Value) -> Result<Value, EngineError> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let bad = |expected: &str| {
        EngineError::InvalidRequest(format!(
            "{}.{}: expected {}, got {}",
            model,
            col.name,
            expected,
            crate::schema::types::json_type_name(v)
        ))
    };
    let Some(type_) = col.type_ else {
        return Ok(v.clone());
    };
    Ok(match type_ {
        FieldType::Integer => match v {
            Value::Number(n) if n.is_i64() || n.is_u64() => v.clone(),
            Value::String(s) => {
                let n: i64 = s.trim().parse().map_err(|_| bad("integer"))?;
                Value::Number(n.into())
            }
            _ => return Err(bad("integer")),
        },
        FieldType::Float => match v {
            Value::Number(_) => v.clone(),
            Value::String(s) => {
                let f: f64 = s.trim().parse().map_err(|_| bad("number"))?;
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| bad("finite number"))?
            }
            _ => return Err(bad("number")),
        },
        FieldType::Boolean => match v {
            Value::Bool(_) => v.clone(),
            Value::Number(n) if n.as_i64() == Some(0) => Value::Bool(false),
            Value::Number(n) if n.as_i64() == Some(1) => Value::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => return Err(bad("boolean")),
        },
        FieldType::Date => match v {
            Value::String(s) => {
                NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| bad("date (YYYY-MM-DD)"))?;
                v.clone()
            }
            _ => return Err(bad("date string")),
        },
        FieldType::Datetime => match v {
            Value::String(s) => {
                let ok = chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok();
                if !ok {
                    return Err(bad("RFC 3339 datetime"));
                }
                v.clone()
            }
            _ => return Err(bad("datetime string")),
        },
        FieldType::Json => v.clone(),
        FieldType::String | FieldType::Text | FieldType::Password => match v {
            Value::String(_) => v.clone(),
            Value::Number(n) => Value::String(n.to_string()),
            _ => return Err(bad("string")),
        },
        FieldType::Lookup => v.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::normalize::normalize;
    use crate::schema::resolved::resolve;
    use serde_json::json;

    fn schema(soft_delete: bool) -> Schema {
        let doc = serde_json::from_value(json!({
            "model": "member",
            "table": "members",
            "soft_delete": soft_delete,
            "fields": {
                "id": {"type": "integer", "auto_increment": true, "readonly": true},
                "name": {"type": "string"},
                "age": {"type": "integer"},
                "joined_on": {"type": "date"},
                "active": {"type": "boolean"},
                "settings": {"type": "json"},
                "secret": {"type": "string", "readonly": true}
            }
        }))
        .unwrap();
        resolve(normalize(doc)).unwrap()
    }

    #[test]
    fn fillable_excludes_pk_readonly_and_timestamps() {
        let handle = ModelHandle::configure(&schema(false));
        let fillable: Vec<_> = handle.fillable_columns().map(|c| c.name.as_str()).collect();
        assert!(fillable.contains(&"name"));
        assert!(!fillable.contains(&"id"));
        assert!(!fillable.contains(&"secret"));
        assert!(!fillable.contains(&"created_at"));
        assert!(!fillable.contains(&"updated_at"));
    }

    #[test]
    fn soft_delete_column_only_when_enabled() {
        assert!(ModelHandle::configure(&schema(false)).soft_delete_column.is_none());
        let handle = ModelHandle::configure(&schema(true));
        assert_eq!(handle.soft_delete_column.as_deref(), Some("deleted_at"));
        assert!(handle.column("deleted_at").is_some());
    }

    #[test]
    fn natural_primary_keys_are_never_fillable() {
        let doc = serde_json::from_value(json!({
            "model": "tag",
            "table": "tags",
            "primary_key": "slug",
            "timestamps": false,
            "fields": {
                "slug": {"type": "string"},
                "label": {"type": "string"}
            }
        }))
        .unwrap();
        let handle = ModelHandle::configure(&resolve(normalize(doc)).unwrap());
        let fillable: Vec<_> = handle.fillable_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(fillable, vec!["label"]);
    }

    #[test]
    fn declared_timestamp_columns_are_not_duplicated() {
        let doc = serde_json::from_value(json!({
            "model": "event",
            "table": "events",
            "fields": {
                "id": {"type": "integer", "auto_increment": true, "readonly": true},
                "created_at": {"type": "datetime", "readonly": true}
            }
        }))
        .unwrap();
        let handle = ModelHandle::configure(&resolve(normalize(doc)).unwrap());
        let n = handle.columns.iter().filter(|c| c.name == "created_at").count();
        assert_eq!(n, 1);
        assert!(handle.column("updated_at").is_some());
    }

    #[test]
    fn coerce_converts_string_scalars() {
        let handle = ModelHandle::configure(&schema(false));
        let body = HashMap::from([
            ("age".to_string(), json!("42")),
            ("active".to_string(), json!("true")),
            ("name".to_string(), json!("Ada")),
        ]);
        let out = handle.coerce(&body).unwrap();
        assert_eq!(out["age"], json!(42));
        assert_eq!(out["active"], json!(true));
        assert_eq!(out["name"], json!("Ada"));
    }

    #[test]
    fn coerce_drops_unknown_and_readonly_keys() {
        let handle = ModelHandle::configure(&schema(false));
        let body = HashMap::from([
            ("id".to_string(), json!(9)),
            ("secret".to_string(), json!("x")),
            ("ghost".to_string(), json!("y")),
            ("name".to_string(), json!("Ada")),
        ]);
        let out = handle.coerce(&body).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("name"));
    }

    #[test]
    fn coerce_rejects_untypable_values() {
        let handle = ModelHandle::configure(&schema(false));
        let body = HashMap::from([("age".to_string(), json!("not a number"))]);
        assert!(matches!(
            handle.coerce(&body),
            Err(EngineError::InvalidRequest(_))
        ));
        let body = HashMap::from([("joined_on".to_string(), json!("01/02/2024"))]);
        assert!(matches!(
            handle.coerce(&body),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn date_and_json_columns_carry_casts() {
        let handle = ModelHandle::configure(&schema(false));
        assert_eq!(handle.column("joined_on").unwrap().pg_cast, Some("date"));
        assert_eq!(handle.column("settings").unwrap().pg_cast, Some("jsonb"));
        assert_eq!(handle.column("name").unwrap().pg_cast, None);
    }
}

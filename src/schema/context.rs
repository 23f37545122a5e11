//! Context-filtered schema views.
//!
//! `view` is a pure function of (resolved schema, context); identical inputs
//! produce byte-identical output, which the cache layer relies on.

use crate::schema::resolved::{Field, Schema};
use crate::schema::types::ActionScope;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Context {
    List,
    Form,
    Detail,
    Meta,
    Full,
}

impl Context {
    /// Unrecognized context strings degrade to `Full` for backward
    /// compatibility with older callers; they never fail.
    pub fn parse(s: &str) -> Context {
        match s {
            "list" => Context::List,
            "form" => Context::Form,
            "detail" => Context::Detail,
            "meta" => Context::Meta,
            _ => Context::Full,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Context::List => "list",
            Context::Form => "form",
            Context::Detail => "detail",
            Context::Meta => "meta",
            Context::Full => "full",
        }
    }
}

/// Reduce a resolved schema to the view for one context.
pub fn view(schema: &Schema, context: Context) -> Value {
    match context {
        Context::Meta => meta_view(schema),
        Context::List => list_view(schema),
        Context::Form => form_view(schema),
        Context::Detail => detail_view(schema),
        Context::Full => serde_json::to_value(&schema.document).unwrap_or(Value::Null),
    }
}

fn meta_view(schema: &Schema) -> Value {
    json!({
        "model": schema.model,
        "title": schema.title,
        "singular_title": schema.singular_title,
        "primary_key": schema.primary_key,
        "permissions": schema.permissions,
        "description": schema.description,
    })
}

fn list_view(schema: &Schema) -> Value {
    let mut fields = Map::new();
    for f in schema.fields.iter().filter(|f| f.listable) {
        let mut attrs = Map::new();
        attrs.insert("type".into(), json!(f.type_));
        attrs.insert("label".into(), json!(f.label));
        attrs.insert("sortable".into(), json!(f.sortable));
        attrs.insert("filterable".into(), json!(f.filterable));
        attrs.insert("searchable".into(), json!(f.searchable));
        if let Some(t) = &f.template {
            attrs.insert("template".into(), json!(t));
        }
        if let Some(w) = &f.width {
            attrs.insert("width".into(), json!(w));
        }
        fields.insert(f.name.clone(), Value::Object(attrs));
    }
    let default_sort: Map<String, Value> = schema
        .default_sort
        .iter()
        .map(|(name, dir)| (name.clone(), json!(dir)))
        .collect();
    json!({
        "model": schema.model,
        "title": schema.title,
        "primary_key": schema.primary_key,
        "fields": fields,
        "default_sort": default_sort,
        "actions": scoped_actions(schema, ActionScope::List),
    })
}

fn form_view(schema: &Schema) -> Value {
    let mut fields = Map::new();
    for f in schema.fields.iter().filter(|f| form_visible(schema, f)) {
        let mut attrs = Map::new();
        attrs.insert("type".into(), json!(f.type_));
        attrs.insert("label".into(), json!(f.label));
        attrs.insert("required".into(), json!(f.required));
        if !f.validation.is_empty() {
            attrs.insert("validation".into(), json!(f.validation));
        }
        if let Some(d) = &f.default {
            attrs.insert("default".into(), d.clone());
        }
        if let Some(p) = &f.placeholder {
            attrs.insert("placeholder".into(), json!(p));
        }
        if let Some(i) = &f.icon {
            attrs.insert("icon".into(), json!(i));
        }
        fields.insert(f.name.clone(), Value::Object(attrs));
    }
    json!({
        "model": schema.model,
        "singular_title": schema.singular_title,
        "fields": fields,
    })
}

/// Form context excludes readonly, non-editable, and autogenerated fields
/// (primary key, auto-increment, timestamp columns).
fn form_visible(schema: &Schema, f: &Field) -> bool {
    if f.readonly || !f.editable || f.auto_increment {
        return false;
    }
    if f.name == schema.primary_key {
        return false;
    }
    !(schema.timestamps && (f.name == "created_at" || f.name == "updated_at"))
}

fn detail_view(schema: &Schema) -> Value {
    let mut fields = Map::new();
    for (name, fd) in &schema.document.fields {
        fields.insert(name.clone(), serde_json::to_value(fd).unwrap_or(Value::Null));
    }
    let relationships: Vec<Value> = schema
        .document
        .relationships
        .iter()
        .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
        .collect();
    let default_sort: Map<String, Value> = schema
        .default_sort
        .iter()
        .map(|(name, dir)| (name.clone(), json!(dir)))
        .collect();
    json!({
        "model": schema.model,
        "title": schema.title,
        "singular_title": schema.singular_title,
        "primary_key": schema.primary_key,
        "title_field": schema.title_field,
        "permissions": schema.permissions,
        "default_sort": default_sort,
        "fields": fields,
        "relationships": relationships,
        "details": schema.details,
        "actions": scoped_actions(schema, ActionScope::Detail),
    })
}

fn scoped_actions(schema: &Schema, scope: ActionScope) -> Vec<Value> {
    schema
        .actions
        .iter()
        .filter(|a| a.scope.contains(&scope))
        .map(|a| serde_json::to_value(a).unwrap_or(Value::Null))
        .collect()
}

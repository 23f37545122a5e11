//! Raw schema document types matching the JSON resource format.
//!
//! These mirror the on-disk shape including legacy spellings; `normalize`
//! produces the canonical form consumed by the rest of the engine.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Closed set of semantic field types. Unknown strings fail deserialization,
/// which is how a field without a usable type surfaces as Malformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    Datetime,
    Json,
    Password,
    Lookup,
}

impl FieldType {
    /// Filter operators a field of this type supports when the document does
    /// not declare an explicit list.
    pub fn default_filter_operators(self) -> Vec<FilterOperator> {
        use FilterOperator::*;
        match self {
            FieldType::String | FieldType::Text => vec![Contains, Equals, StartsWith],
            FieldType::Integer | FieldType::Float | FieldType::Date | FieldType::Datetime => {
                vec![Equals, NotEquals, Range]
            }
            FieldType::Boolean => vec![Equals],
            FieldType::Lookup => vec![Equals, In],
            FieldType::Json | FieldType::Password => vec![],
        }
    }
}

/// Closed set of filter operators a field may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    Range,
    In,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl ValidationRule {
    pub fn is_empty(&self) -> bool {
        *self == ValidationRule::default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDocument {
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub searchable: bool,
    /// Defaults to included; `listable: false` hides the field from list views.
    #[serde(default = "default_true")]
    pub listable: bool,
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "ValidationRule::is_empty")]
    pub validation: ValidationRule,
    /// Explicit filter operator list; defaulted from the type by normalize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<FilterOperator>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    ManyToMany,
    ManyToManyThrough,
    /// One-to-many child listing shown as a detail section.
    Detail,
}

/// One attach/sync/detach instruction tied to a lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    Attach {
        /// Literal id or one of the special tokens `now`, `current_user`,
        /// `current_date`.
        related_id: Value,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        pivot: BTreeMap<String, Value>,
    },
    Sync {
        /// Input field whose value is the full array of related ids.
        field: String,
    },
    Detach {
        ids: DetachTarget,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DetachTarget {
    All(String),
    Ids(Vec<Value>),
}

impl<'de> Deserialize<'de> for DetachTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        match v {
            Value::String(s) if s == "all" => Ok(DetachTarget::All(s)),
            Value::Array(items) => Ok(DetachTarget::Ids(items)),
            other => Err(serde::de::Error::custom(format!(
                "detach ids must be \"all\" or an array of ids; got {}",
                json_type_name(&other)
            ))),
        }
    }
}

pub(crate) fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleActions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_create: Vec<Directive>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_update: Vec<Directive>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_delete: Vec<Directive>,
}

impl LifecycleActions {
    pub fn is_empty(&self) -> bool {
        self.on_create.is_empty() && self.on_update.is_empty() && self.on_delete.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: RelationshipType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through_table: Option<String>,
    /// Model name of the related schema, for eager schema embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_model: Option<String>,
    #[serde(default, skip_serializing_if = "LifecycleActions::is_empty")]
    pub actions: LifecycleActions,
}

/// One-to-many child listing rendered under the record detail view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailSection {
    pub model: String,
    pub foreign_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list_fields: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FieldUpdate,
    ApiCall,
    Route,
    Form,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionScope {
    List,
    Detail,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionDocument {
    pub key: String,
    #[serde(rename = "type")]
    pub type_: ActionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<ActionScope>,
    /// Target field for field_update actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modal: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singular_title: Option<String>,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default)]
    pub soft_delete: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_sort: BTreeMap<String, SortDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: BTreeMap<String, FieldDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RelationshipDocument>,
    /// Legacy singular form; normalize folds it into `details`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<DetailSection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<DetailSection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionDocument>,
    /// Default action keys (create/edit/delete) that must not be synthesized.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppress_default_actions: Vec<String>,
}

fn default_primary_key() -> String {
    "id".into()
}

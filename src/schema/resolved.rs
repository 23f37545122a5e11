//! Resolved schema: normalized document validated and flattened for runtime use.

use crate::error::SchemaError;
use crate::schema::types::{
    ActionDocument, DetailSection, FieldDocument, FieldType, FilterOperator, LifecycleActions,
    RelationshipType, SchemaDocument, SortDirection,
};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Allow-listed identifier pattern for every name that ends up quoted in SQL.
pub fn is_valid_identifier(s: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let re = IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"));
    re.is_match(s)
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub type_: FieldType,
    pub label: String,
    pub required: bool,
    pub sortable: bool,
    pub filterable: bool,
    pub searchable: bool,
    pub listable: bool,
    pub editable: bool,
    pub readonly: bool,
    pub auto_increment: bool,
    pub default: Option<Value>,
    pub validation: crate::schema::types::ValidationRule,
    pub filter_operators: Vec<FilterOperator>,
    pub template: Option<String>,
    pub width: Option<String>,
    pub icon: Option<String>,
    pub placeholder: Option<String>,
}

impl Field {
    /// Mass-assignable: never auto-increment, never readonly.
    pub fn is_fillable(&self) -> bool {
        !self.auto_increment && !self.readonly
    }

    pub fn allows_operator(&self, op: FilterOperator) -> bool {
        self.filterable && self.filter_operators.contains(&op)
    }
}

#[derive(Clone, Debug)]
pub struct Relationship {
    pub name: String,
    pub type_: RelationshipType,
    pub pivot_table: Option<String>,
    pub foreign_key: Option<String>,
    pub related_key: Option<String>,
    pub through_table: Option<String>,
    pub related_model: Option<String>,
    pub actions: LifecycleActions,
}

impl Relationship {
    /// Relationship kinds backed by a pivot table, i.e. eligible for
    /// attach/sync/detach directives.
    pub fn has_pivot(&self) -> bool {
        matches!(
            self.type_,
            RelationshipType::ManyToMany | RelationshipType::ManyToManyThrough
        )
    }
}

#[derive(Clone, Debug)]
pub struct Schema {
    pub model: String,
    pub title: String,
    pub singular_title: String,
    pub table: String,
    pub connection: Option<String>,
    pub primary_key: String,
    pub timestamps: bool,
    pub soft_delete: bool,
    pub permissions: BTreeMap<String, String>,
    pub default_sort: Vec<(String, SortDirection)>,
    pub title_field: Option<String>,
    pub description: Option<String>,
    /// Fields in document (name) order.
    pub fields: Vec<Field>,
    pub relationships: Vec<Relationship>,
    pub details: Vec<DetailSection>,
    pub actions: Vec<ActionDocument>,
    /// The normalized document this schema was resolved from; serialized
    /// verbatim for the `full` context view.
    pub document: SchemaDocument,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Permission key for an action, falling back to the `{model}.{action}`
    /// convention when the permission map has no explicit entry.
    pub fn permission_for(&self, action: &str) -> String {
        self.permissions
            .get(action)
            .cloned()
            .unwrap_or_else(|| format!("{}.{}", self.model, action))
    }

    pub fn searchable_fields(&self) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.searchable).collect()
    }
}

/// Build the resolved schema from a normalized document.
pub fn resolve(doc: SchemaDocument) -> Result<Schema, SchemaError> {
    let model = doc.model.clone();
    check_identifier(&model, "model", &model)?;
    check_identifier(&model, "table", &doc.table)?;
    check_identifier(&model, "primary key", &doc.primary_key)?;
    if let Some(conn) = &doc.connection {
        check_identifier(&model, "connection", conn)?;
    }
    if doc.fields.is_empty() {
        return Err(SchemaError::MissingKey {
            model,
            key: "fields",
        });
    }

    let mut fields = Vec::with_capacity(doc.fields.len());
    for (name, fd) in &doc.fields {
        check_identifier(&model, "field", name)?;
        fields.push(resolve_field(name, fd));
    }
    if !doc.fields.contains_key(&doc.primary_key) {
        return Err(SchemaError::InvalidField {
            model,
            field: doc.primary_key.clone(),
            reason: "primary key is not declared in the field map".into(),
        });
    }

    let mut default_sort = Vec::with_capacity(doc.default_sort.len());
    for (name, dir) in &doc.default_sort {
        let sortable = doc.fields.get(name).map(|f| f.sortable).unwrap_or(false);
        if !sortable {
            return Err(SchemaError::UnsortableDefaultSort {
                model,
                field: name.clone(),
            });
        }
        default_sort.push((name.clone(), *dir));
    }

    let mut relationships = Vec::with_capacity(doc.relationships.len());
    for rd in &doc.relationships {
        relationships.push(resolve_relationship(&model, rd)?);
    }

    let mut seen = std::collections::HashSet::new();
    for action in &doc.actions {
        if !seen.insert(action.key.as_str()) {
            return Err(SchemaError::DuplicateAction {
                model,
                key: action.key.clone(),
            });
        }
        if matches!(action.type_, crate::schema::types::ActionType::FieldUpdate) {
            let target = action.field.as_deref().unwrap_or("");
            if !doc.fields.contains_key(target) {
                return Err(SchemaError::InvalidField {
                    model,
                    field: target.to_string(),
                    reason: format!("field_update action '{}' targets an unknown field", action.key),
                });
            }
        }
    }

    for section in &doc.details {
        check_identifier(&model, "detail foreign key", &section.foreign_key)?;
    }

    Ok(Schema {
        model: doc.model.clone(),
        title: doc.title.clone().unwrap_or_else(|| doc.model.clone()),
        singular_title: doc.singular_title.clone().unwrap_or_else(|| doc.model.clone()),
        table: doc.table.clone(),
        connection: doc.connection.clone(),
        primary_key: doc.primary_key.clone(),
        timestamps: doc.timestamps,
        soft_delete: doc.soft_delete,
        permissions: doc.permissions.clone(),
        default_sort,
        title_field: doc.title_field.clone(),
        description: doc.description.clone(),
        fields,
        relationships,
        details: doc.details.clone(),
        actions: doc.actions.clone(),
        document: doc,
    })
}

fn resolve_field(name: &str, fd: &FieldDocument) -> Field {
    Field {
        name: name.to_string(),
        type_: fd.type_,
        label: fd.label.clone().unwrap_or_else(|| name.to_string()),
        required: fd.required,
        sortable: fd.sortable,
        filterable: fd.filterable,
        searchable: fd.searchable,
        listable: fd.listable,
        editable: fd.editable,
        readonly: fd.readonly,
        auto_increment: fd.auto_increment,
        default: fd.default.clone(),
        validation: fd.validation.clone(),
        filter_operators: fd.filter.clone().unwrap_or_default(),
        template: fd.template.clone(),
        width: fd.width.clone(),
        icon: fd.icon.clone(),
        placeholder: fd.placeholder.clone(),
    }
}

fn resolve_relationship(
    model: &str,
    rd: &crate::schema::types::RelationshipDocument,
) -> Result<Relationship, SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidRelationship {
        model: model.to_string(),
        relationship: rd.name.clone(),
        reason,
    };
    check_identifier(model, "relationship", &rd.name)?;
    match rd.type_ {
        RelationshipType::ManyToMany | RelationshipType::ManyToManyThrough => {
            for (key, value) in [
                ("pivot_table", &rd.pivot_table),
                ("foreign_key", &rd.foreign_key),
                ("related_key", &rd.related_key),
            ] {
                let v = value
                    .as_deref()
                    .ok_or_else(|| invalid(format!("missing '{}'", key)))?;
                check_identifier(model, "relationship key", v)?;
            }
            if matches!(rd.type_, RelationshipType::ManyToManyThrough) {
                let through = rd
                    .through_table
                    .as_deref()
                    .ok_or_else(|| invalid("missing 'through_table'".into()))?;
                check_identifier(model, "relationship key", through)?;
            }
        }
        RelationshipType::Detail => {
            if !rd.actions.is_empty() {
                return Err(invalid(
                    "detail relationships do not support pivot directives".into(),
                ));
            }
        }
    }
    Ok(Relationship {
        name: rd.name.clone(),
        type_: rd.type_,
        pivot_table: rd.pivot_table.clone(),
        foreign_key: rd.foreign_key.clone(),
        related_key: rd.related_key.clone(),
        through_table: rd.through_table.clone(),
        related_model: rd.related_model.clone(),
        actions: rd.actions.clone(),
    })
}

fn check_identifier(model: &str, kind: &'static str, ident: &str) -> Result<(), SchemaError> {
    if is_valid_identifier(ident) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            model: model.to_string(),
            kind,
            ident: ident.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::normalize::normalize;

    fn doc(json: serde_json::Value) -> SchemaDocument {
        serde_json::from_value(json).unwrap()
    }

    fn role_schema_doc() -> SchemaDocument {
        doc(serde_json::json!({
            "model": "role",
            "table": "roles",
            "soft_delete": true,
            "default_sort": {"name": "asc"},
            "fields": {
                "id": {"type": "integer", "auto_increment": true, "readonly": true},
                "name": {"type": "string", "sortable": true, "searchable": true}
            },
            "relationships": [{
                "name": "users",
                "type": "many_to_many",
                "pivot_table": "role_users",
                "foreign_key": "role_id",
                "related_key": "user_id"
            }]
        }))
    }

    #[test]
    fn resolves_valid_schema() {
        let schema = resolve(normalize(role_schema_doc())).unwrap();
        assert_eq!(schema.table, "roles");
        assert!(schema.soft_delete);
        assert_eq!(schema.default_sort, vec![("name".to_string(), SortDirection::Asc)]);
        assert!(schema.relationship("users").unwrap().has_pivot());
        assert!(!schema.field("id").unwrap().is_fillable());
        assert!(schema.field("name").unwrap().is_fillable());
    }

    #[test]
    fn permission_falls_back_to_convention() {
        let schema = resolve(normalize(role_schema_doc())).unwrap();
        assert_eq!(schema.permission_for("delete"), "role.delete");
    }

    #[test]
    fn rejects_injection_through_table_name() {
        let mut d = role_schema_doc();
        d.table = "roles; DROP TABLE users".into();
        let err = resolve(d).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidIdentifier { kind: "table", .. }));
    }

    #[test]
    fn rejects_unsortable_default_sort() {
        let mut d = role_schema_doc();
        d.default_sort.insert("id".into(), SortDirection::Asc);
        let err = resolve(d).unwrap_err();
        assert!(matches!(err, SchemaError::UnsortableDefaultSort { .. }));
    }

    #[test]
    fn rejects_pivot_relationship_without_keys() {
        let mut d = role_schema_doc();
        d.relationships[0].related_key = None;
        let err = resolve(d).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidRelationship { .. }));
    }

    #[test]
    fn rejects_missing_primary_key_field() {
        let mut d = role_schema_doc();
        d.primary_key = "uuid".into();
        let err = resolve(d).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { .. }));
    }

    #[test]
    fn rejects_duplicate_action_keys() {
        let mut d = normalize(role_schema_doc());
        let action = crate::schema::types::ActionDocument {
            key: "ping".into(),
            type_: crate::schema::types::ActionType::ApiCall,
            scope: vec![],
            field: None,
            permission: None,
            confirm: None,
            label: None,
            icon: None,
            style: None,
            modal: None,
        };
        d.actions.push(action.clone());
        d.actions.push(action);
        let err = resolve(d).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateAction { .. }));
    }
}

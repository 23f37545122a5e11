//! Parameterized SQL built from model handles: identifiers come only from
//! validated schema documents, values are always bound.

use crate::model::{DeletedScope, ModelHandle, UPDATED_AT_COLUMN};
use serde_json::Value;
use std::collections::HashMap;

/// Quote an identifier for PostgreSQL.
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    pub(crate) fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Push a parameter and return its 1-based placeholder number.
    pub(crate) fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

pub(crate) fn column_list(model: &ModelHandle) -> String {
    model
        .columns
        .iter()
        .map(|c| quoted(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholder(model: &ModelHandle, column: &str, n: usize) -> String {
    match model.column(column).and_then(|c| c.pg_cast) {
        Some(cast) => format!("${}::{}", n, cast),
        None => format!("${}", n),
    }
}

/// Soft-delete scope predicate; None when the model has no soft-delete column
/// or the scope places no restriction.
pub(crate) fn deleted_predicate(model: &ModelHandle, scope: DeletedScope) -> Option<String> {
    let col = model.soft_delete_column.as_deref()?;
    match scope {
        DeletedScope::Exclude => Some(format!("{} IS NULL", quoted(col))),
        DeletedScope::Include => None,
        DeletedScope::Only => Some(format!("{} IS NOT NULL", quoted(col))),
    }
}

/// INSERT from the coerced body; fillable columns only. When timestamps are
/// enabled, created_at/updated_at are set by the engine rather than relying
/// on column defaults.
pub fn insert(model: &ModelHandle, body: &HashMap<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for c in model.fillable_columns() {
        let Some(v) = body.get(&c.name) else { continue };
        let n = q.push_param(v.clone());
        cols.push(quoted(&c.name));
        values.push(placeholder(model, &c.name, n));
    }
    if model.timestamps {
        for name in [crate::model::CREATED_AT_COLUMN, UPDATED_AT_COLUMN] {
            cols.push(quoted(name));
            values.push("NOW()".to_string());
        }
    }
    q.sql = if cols.is_empty() {
        // Nothing to bind: every column comes from its database default.
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            quoted(&model.table),
            column_list(model)
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quoted(&model.table),
            cols.join(", "),
            values.join(", "),
            column_list(model)
        )
    };
    q
}

/// UPDATE by primary key: SET only fillable columns present in the body.
/// Soft-deleted rows are never updated through the default path.
pub fn update(model: &ModelHandle, id: &Value, body: &HashMap<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for c in model.fillable_columns() {
        let Some(v) = body.get(&c.name) else { continue };
        let n = q.push_param(v.clone());
        sets.push(format!("{} = {}", quoted(&c.name), placeholder(model, &c.name, n)));
    }
    if sets.is_empty() {
        // Nothing to change: don't touch updated_at, just echo the record.
        return select_by_pk(model, id, DeletedScope::Exclude);
    }
    if model.timestamps {
        sets.push(format!("{} = NOW()", quoted(UPDATED_AT_COLUMN)));
    }
    let id_param = q.push_param(id.clone());
    let mut where_clause = format!(
        "{} = {}",
        quoted(&model.primary_key),
        placeholder(model, &model.primary_key, id_param)
    );
    if let Some(scope) = deleted_predicate(model, DeletedScope::Exclude) {
        where_clause.push_str(" AND ");
        where_clause.push_str(&scope);
    }
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        quoted(&model.table),
        sets.join(", "),
        where_clause,
        column_list(model)
    );
    q
}

pub fn select_by_pk(model: &ModelHandle, id: &Value, deleted: DeletedScope) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(id.clone());
    let mut where_clause = format!(
        "{} = {}",
        quoted(&model.primary_key),
        placeholder(model, &model.primary_key, n)
    );
    if let Some(scope) = deleted_predicate(model, deleted) {
        where_clause.push_str(" AND ");
        where_clause.push_str(&scope);
    }
    q.sql = format!(
        "SELECT {} FROM {} WHERE {}",
        column_list(model),
        quoted(&model.table),
        where_clause
    );
    q
}

/// Soft delete: stamp the delete column. Only valid for soft-delete models;
/// the service layer routes hard deletes elsewhere.
pub fn soft_delete(model: &ModelHandle, id: &Value, column: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(id.clone());
    q.sql = format!(
        "UPDATE {} SET {} = NOW() WHERE {} = {} AND {} IS NULL RETURNING {}",
        quoted(&model.table),
        quoted(column),
        quoted(&model.primary_key),
        placeholder(model, &model.primary_key, n),
        quoted(column),
        column_list(model)
    );
    q
}

/// Clear the delete stamp so the record reappears in default queries.
pub fn restore(model: &ModelHandle, id: &Value, column: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(id.clone());
    q.sql = format!(
        "UPDATE {} SET {} = NULL WHERE {} = {} AND {} IS NOT NULL RETURNING {}",
        quoted(&model.table),
        quoted(column),
        quoted(&model.primary_key),
        placeholder(model, &model.primary_key, n),
        quoted(column),
        column_list(model)
    );
    q
}

pub fn hard_delete(model: &ModelHandle, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(id.clone());
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        quoted(&model.table),
        quoted(&model.primary_key),
        placeholder(model, &model.primary_key, n),
        column_list(model)
    );
    q
}

/// Pivot insert. ON CONFLICT DO NOTHING makes a duplicate attach a no-op
/// against the pivot's uniqueness constraint.
pub fn pivot_attach(
    pivot_table: &str,
    foreign_key: &str,
    related_key: &str,
    record_id: &Value,
    related_id: &Value,
    pivot_data: &[(String, Value)],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = vec![quoted(foreign_key), quoted(related_key)];
    let mut values = vec![
        format!("${}", q.push_param(record_id.clone())),
        format!("${}", q.push_param(related_id.clone())),
    ];
    for (name, value) in pivot_data {
        cols.push(quoted(name));
        values.push(format!("${}", q.push_param(value.clone())));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
        quoted(pivot_table),
        cols.join(", "),
        values.join(", ")
    );
    q
}

/// Current related ids for one record, for sync set-difference.
pub fn pivot_related_ids(
    pivot_table: &str,
    foreign_key: &str,
    related_key: &str,
    record_id: &Value,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(record_id.clone());
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = ${}",
        quoted(related_key),
        quoted(pivot_table),
        quoted(foreign_key),
        n
    );
    q
}

/// Remove pivot rows: all for the record, or an explicit related-id set.
/// Detaching absent pairs is naturally a no-op.
pub fn pivot_detach(
    pivot_table: &str,
    foreign_key: &str,
    related_key: &str,
    record_id: &Value,
    related_ids: Option<&[Value]>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(record_id.clone());
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = ${}",
        quoted(pivot_table),
        quoted(foreign_key),
        n
    );
    if let Some(ids) = related_ids {
        let placeholders: Vec<String> = ids
            .iter()
            .map(|id| format!("${}", q.push_param(id.clone())))
            .collect();
        sql.push_str(&format!(
            " AND {} IN ({})",
            quoted(related_key),
            placeholders.join(", ")
        ));
    }
    q.sql = sql;
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::normalize::normalize;
    use crate::schema::resolved::resolve;
    use serde_json::json;

    fn model(soft_delete: bool) -> ModelHandle {
        let doc = serde_json::from_value(json!({
            "model": "member",
            "table": "members",
            "soft_delete": soft_delete,
            "fields": {
                "id": {"type": "integer", "auto_increment": true, "readonly": true},
                "name": {"type": "string"},
                "joined_on": {"type": "date"}
            }
        }))
        .unwrap();
        ModelHandle::configure(&resolve(normalize(doc)).unwrap())
    }

    #[test]
    fn insert_binds_fillable_only_and_stamps_timestamps() {
        let body = HashMap::from([
            ("name".to_string(), json!("Ada")),
            ("id".to_string(), json!(7)),
        ]);
        let q = insert(&model(false), &body);
        assert_eq!(
            q.sql,
            "INSERT INTO \"members\" (\"name\", \"created_at\", \"updated_at\") \
             VALUES ($1, NOW(), NOW()) RETURNING \"id\", \"joined_on\", \"name\", \
             \"created_at\", \"updated_at\""
        );
        assert_eq!(q.params, vec![json!("Ada")]);
    }

    #[test]
    fn insert_without_bindable_values_uses_column_defaults() {
        let doc = serde_json::from_value(json!({
            "model": "tag",
            "table": "tags",
            "timestamps": false,
            "fields": {
                "id": {"type": "integer", "auto_increment": true, "readonly": true},
                "label": {"type": "string"}
            }
        }))
        .unwrap();
        let m = ModelHandle::configure(&resolve(normalize(doc)).unwrap());
        let q = insert(&m, &HashMap::new());
        assert_eq!(
            q.sql,
            "INSERT INTO \"tags\" DEFAULT VALUES RETURNING \"id\", \"label\""
        );
        assert!(q.params.is_empty());
    }

    #[test]
    fn update_scopes_out_soft_deleted_rows() {
        let body = HashMap::from([("name".to_string(), json!("Ada"))]);
        let q = update(&model(true), &json!(5), &body);
        assert!(q.sql.contains("\"deleted_at\" IS NULL"));
        assert!(q.sql.contains("\"updated_at\" = NOW()"));
        assert_eq!(q.params, vec![json!("Ada"), json!(5)]);
    }

    #[test]
    fn update_without_soft_delete_never_mentions_delete_column() {
        let q = update(
            &model(false),
            &json!(5),
            &HashMap::from([("name".to_string(), json!("Ada"))]),
        );
        assert!(!q.sql.contains("deleted_at"));
    }

    #[test]
    fn empty_update_degrades_to_select() {
        let q = update(&model(false), &json!(5), &HashMap::new());
        assert!(q.sql.starts_with("SELECT"));
        assert_eq!(q.params, vec![json!(5)]);
    }

    #[test]
    fn date_columns_use_casted_placeholders() {
        let body = HashMap::from([("joined_on".to_string(), json!("2024-02-01"))]);
        let q = insert(&model(false), &body);
        assert!(q.sql.contains("$1::date"));
    }

    #[test]
    fn select_by_pk_honors_deleted_scope() {
        let visible = select_by_pk(&model(true), &json!(5), DeletedScope::Exclude);
        assert!(visible.sql.contains("\"deleted_at\" IS NULL"));
        let all = select_by_pk(&model(true), &json!(5), DeletedScope::Include);
        assert!(!all.sql.contains("deleted_at"));
        let trashed = select_by_pk(&model(true), &json!(5), DeletedScope::Only);
        assert!(trashed.sql.contains("\"deleted_at\" IS NOT NULL"));
    }

    #[test]
    fn soft_delete_and_restore_are_symmetric() {
        let m = model(true);
        let del = soft_delete(&m, &json!(5), "deleted_at");
        assert!(del.sql.contains("SET \"deleted_at\" = NOW()"));
        assert!(del.sql.contains("\"deleted_at\" IS NULL"));
        let res = restore(&m, &json!(5), "deleted_at");
        assert!(res.sql.contains("SET \"deleted_at\" = NULL"));
        assert!(res.sql.contains("\"deleted_at\" IS NOT NULL"));
    }

    #[test]
    fn pivot_attach_is_conflict_tolerant() {
        let q = pivot_attach(
            "role_users",
            "user_id",
            "role_id",
            &json!(1),
            &json!(2),
            &[("granted_by".to_string(), json!(9))],
        );
        assert_eq!(
            q.sql,
            "INSERT INTO \"role_users\" (\"user_id\", \"role_id\", \"granted_by\") \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"
        );
        assert_eq!(q.params, vec![json!(1), json!(2), json!(9)]);
    }

    #[test]
    fn pivot_detach_all_and_subset() {
        let all = pivot_detach("role_users", "user_id", "role_id", &json!(1), None);
        assert_eq!(all.sql, "DELETE FROM \"role_users\" WHERE \"user_id\" = $1");
        let some = pivot_detach(
            "role_users",
            "user_id",
            "role_id",
            &json!(1),
            Some(&[json!(2), json!(3)]),
        );
        assert_eq!(
            some.sql,
            "DELETE FROM \"role_users\" WHERE \"user_id\" = $1 AND \"role_id\" IN ($2, $3)"
        );
    }
}

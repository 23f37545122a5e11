//! Generic CRUD lifecycle execution: access check, validation, coercion, the
//! record mutation, and relationship directives, all inside one transaction
//! per logical operation.

use crate::access::{authorize, AccessGate};
use crate::error::EngineError;
use crate::model::{DeletedScope, ModelHandle};
use crate::relations::{ActionContext, LifecycleEvent, RelationshipActionProcessor};
use crate::schema::resolved::Schema;
use crate::service::RequestValidator;
use crate::sprunje::{Page, Sprunje, SprunjeRequest};
use crate::sql::{self, BindValue, QueryBuf};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;

pub struct CrudService;

impl CrudService {
    /// Insert one record and run its `on_create` directives. Rolls back the
    /// insert if any directive fails at the database level.
    pub async fn create(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        ctx: &ActionContext,
        body: &HashMap<String, Value>,
    ) -> Result<Value, EngineError> {
        authorize(gate, schema, "create")?;
        RequestValidator::validate(schema, body)?;
        let model = ModelHandle::configure(schema);
        let coerced = model.coerce(body)?;

        let mut tx = pool.begin().await?;
        let q = sql::insert(&model, &coerced);
        let row = fetch_optional_tx(&mut tx, &q)
            .await?
            .ok_or_else(|| EngineError::Db(sqlx::Error::RowNotFound))?;
        let record_id = primary_key_of(&row, &model)?;
        RelationshipActionProcessor::apply(
            &mut tx,
            schema,
            LifecycleEvent::OnCreate,
            &record_id,
            body,
            ctx,
        )
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Fetch one record by primary key. The deleted scope controls whether
    /// soft-deleted rows are hidden (the default), visible, or the only match.
    pub async fn read(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        id: &Value,
        deleted: DeletedScope,
    ) -> Result<Value, EngineError> {
        authorize(gate, schema, "read")?;
        let model = ModelHandle::configure(schema);
        if deleted == DeletedScope::Only && model.soft_delete_column.is_none() {
            return Err(EngineError::InvalidRequest(format!(
                "{}: deleted-only scope requires soft_delete",
                schema.model
            )));
        }
        let q = sql::select_by_pk(&model, id, deleted);
        fetch_optional(pool, &q)
            .await?
            .ok_or_else(|| not_found(schema, id))
    }

    /// Sorted/filtered/searched/paginated listing per the schema's declared
    /// field capabilities.
    pub async fn list(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        request: &SprunjeRequest,
    ) -> Result<Page, EngineError> {
        authorize(gate, schema, "read")?;
        let model = ModelHandle::configure(schema);
        Sprunje::new(&model, schema).run(pool, request).await
    }

    /// Partial update by primary key, then `on_update` directives.
    pub async fn update(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        ctx: &ActionContext,
        id: &Value,
        body: &HashMap<String, Value>,
    ) -> Result<Value, EngineError> {
        authorize(gate, schema, "update")?;
        RequestValidator::validate_partial(schema, body)?;
        let model = ModelHandle::configure(schema);
        let coerced = model.coerce(body)?;

        let mut tx = pool.begin().await?;
        let q = sql::update(&model, id, &coerced);
        let row = fetch_optional_tx(&mut tx, &q)
            .await?
            .ok_or_else(|| not_found(schema, id))?;
        RelationshipActionProcessor::apply(
            &mut tx,
            schema,
            LifecycleEvent::OnUpdate,
            id,
            body,
            ctx,
        )
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Delete by primary key: soft (stamp the delete column) when the schema
    /// enables soft deletion, hard otherwise. `on_delete` directives run
    /// before the row mutation so referential constraints cannot block it
    /// and no orphaned pivot rows survive.
    pub async fn delete(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        ctx: &ActionContext,
        id: &Value,
    ) -> Result<Value, EngineError> {
        authorize(gate, schema, "delete")?;
        let model = ModelHandle::configure(schema);

        let mut tx = pool.begin().await?;
        RelationshipActionProcessor::apply(
            &mut tx,
            schema,
            LifecycleEvent::OnDelete,
            id,
            &HashMap::new(),
            ctx,
        )
        .await?;
        let q = match model.soft_delete_column.as_deref() {
            Some(column) => sql::soft_delete(&model, id, column),
            None => sql::hard_delete(&model, id),
        };
        let row = fetch_optional_tx(&mut tx, &q)
            .await?
            .ok_or_else(|| not_found(schema, id))?;
        tx.commit().await?;
        Ok(row)
    }

    /// Clear the delete stamp so the record reappears in default queries.
    /// Only meaningful for soft-delete schemas.
    pub async fn restore(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        id: &Value,
    ) -> Result<Value, EngineError> {
        authorize(gate, schema, "restore")?;
        let model = ModelHandle::configure(schema);
        let Some(column) = model.soft_delete_column.as_deref() else {
            return Err(EngineError::InvalidRequest(format!(
                "{}: restore requires soft_delete",
                schema.model
            )));
        };
        let q = sql::restore(&model, id, column);
        fetch_optional(pool, &q)
            .await?
            .ok_or_else(|| not_found(schema, id))
    }

    /// Hard delete regardless of soft-delete configuration, with `on_delete`
    /// directives first.
    pub async fn force_delete(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        ctx: &ActionContext,
        id: &Value,
    ) -> Result<Value, EngineError> {
        authorize(gate, schema, "delete")?;
        let model = ModelHandle::configure(schema);
        let mut tx = pool.begin().await?;
        RelationshipActionProcessor::apply(
            &mut tx,
            schema,
            LifecycleEvent::OnDelete,
            id,
            &HashMap::new(),
            ctx,
        )
        .await?;
        let q = sql::hard_delete(&model, id);
        let row = fetch_optional_tx(&mut tx, &q)
            .await?
            .ok_or_else(|| not_found(schema, id))?;
        tx.commit().await?;
        Ok(row)
    }

    /// Attach explicit related ids on a named pivot relationship. Pairs that
    /// already exist are left alone.
    pub async fn attach(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        relationship: &str,
        record_id: &Value,
        ids: &[Value],
    ) -> Result<(), EngineError> {
        authorize(gate, schema, "update")?;
        let (pivot, fk, rk) = pivot_relationship(schema, relationship)?;
        let mut tx = pool.begin().await?;
        for id in ids {
            let q = sql::pivot_attach(pivot, fk, rk, record_id, id, &[]);
            execute_tx(&mut tx, &q).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Detach explicit related ids on a named pivot relationship. Absent
    /// pairs are no-ops; an empty id list detaches nothing.
    pub async fn detach(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        relationship: &str,
        record_id: &Value,
        ids: &[Value],
    ) -> Result<(), EngineError> {
        authorize(gate, schema, "update")?;
        let (pivot, fk, rk) = pivot_relationship(schema, relationship)?;
        if ids.is_empty() {
            return Ok(());
        }
        let q = sql::pivot_detach(pivot, fk, rk, record_id, Some(ids));
        let mut tx = pool.begin().await?;
        execute_tx(&mut tx, &q).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Run a schema-declared field_update action: set the action's target
    /// field on one record, gated by the action's own permission key.
    pub async fn field_update(
        pool: &PgPool,
        schema: &Schema,
        gate: &dyn AccessGate,
        action_key: &str,
        id: &Value,
        value: &Value,
    ) -> Result<Value, EngineError> {
        let action = schema
            .actions
            .iter()
            .find(|a| a.key == action_key)
            .ok_or_else(|| {
                EngineError::InvalidRequest(format!(
                    "{}: unknown action '{}'",
                    schema.model, action_key
                ))
            })?;
        if !matches!(action.type_, crate::schema::types::ActionType::FieldUpdate) {
            return Err(EngineError::InvalidRequest(format!(
                "{}: action '{}' is not a field_update",
                schema.model, action_key
            )));
        }
        let permission = action
            .permission
            .clone()
            .unwrap_or_else(|| format!("{}.{}", schema.model, action_key));
        if !gate.check(&permission) {
            return Err(EngineError::Forbidden { permission });
        }
        let field = action.field.clone().ok_or_else(|| {
            EngineError::InvalidRequest(format!(
                "{}: action '{}' has no target field",
                schema.model, action_key
            ))
        })?;
        let body = HashMap::from([(field, value.clone())]);
        RequestValidator::validate_partial(schema, &body)?;
        let model = ModelHandle::configure(schema);
        let coerced = model.coerce(&body)?;
        let q = sql::update(&model, id, &coerced);
        fetch_optional(pool, &q)
            .await?
            .ok_or_else(|| not_found(schema, id))
    }
}

fn pivot_relationship<'a>(
    schema: &'a Schema,
    name: &str,
) -> Result<(&'a str, &'a str, &'a str), EngineError> {
    let rel = schema.relationship(name).ok_or_else(|| {
        EngineError::InvalidRequest(format!("{}: unknown relationship '{}'", schema.model, name))
    })?;
    match (
        rel.has_pivot(),
        rel.pivot_table.as_deref(),
        rel.foreign_key.as_deref(),
        rel.related_key.as_deref(),
    ) {
        (true, Some(pivot), Some(fk), Some(rk)) => Ok((pivot, fk, rk)),
        _ => Err(EngineError::InvalidRequest(format!(
            "{}: relationship '{}' has no pivot table",
            schema.model, name
        ))),
    }
}

async fn execute_tx(tx: &mut PgConnection, q: &QueryBuf) -> Result<(), EngineError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(BindValue::from_json(p));
    }
    query.execute(&mut *tx).await.map_err(EngineError::from_db)?;
    Ok(())
}

fn not_found(schema: &Schema, id: &Value) -> EngineError {
    EngineError::NotFound(format!("{} '{}'", schema.model, id))
}

fn primary_key_of(row: &Value, model: &ModelHandle) -> Result<Value, EngineError> {
    row.as_object()
        .and_then(|m| m.get(&model.primary_key))
        .cloned()
        .ok_or_else(|| EngineError::Db(sqlx::Error::ColumnNotFound(model.primary_key.clone())))
}

async fn fetch_optional(pool: &PgPool, q: &QueryBuf) -> Result<Option<Value>, EngineError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(BindValue::from_json(p));
    }
    let row = query.fetch_optional(pool).await.map_err(EngineError::from_db)?;
    Ok(row.as_ref().map(sql::row_to_json))
}

async fn fetch_optional_tx(
    tx: &mut PgConnection,
    q: &QueryBuf,
) -> Result<Option<Value>, EngineError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(BindValue::from_json(p));
    }
    let row = query
        .fetch_optional(&mut *tx)
        .await
        .map_err(EngineError::from_db)?;
    Ok(row.as_ref().map(sql::row_to_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AllowAll;
    use crate::schema::normalize::normalize;
    use crate::schema::resolved::resolve;
    use serde_json::json;

    struct DenyAll;

    impl AccessGate for DenyAll {
        fn check(&self, _permission_key: &str) -> bool {
            false
        }
    }

    fn schema() -> Schema {
        let doc = serde_json::from_value(json!({
            "model": "user",
            "table": "users",
            "permissions": {"create": "admin.user.create"},
            "fields": {
                "id": {"type": "integer", "auto_increment": true, "readonly": true},
                "name": {"type": "string", "required": true}
            }
        }))
        .unwrap();
        resolve(normalize(doc)).unwrap()
    }

    /// A lazily-connecting pool: never dials out as long as the code under
    /// test fails before executing a query.
    fn lazy_pool() -> PgPool {
        PgPool::connect_lazy("postgres://localhost/unused").unwrap()
    }

    #[tokio::test]
    async fn denied_gate_fails_before_any_database_work() {
        let err = CrudService::create(
            &lazy_pool(),
            &schema(),
            &DenyAll,
            &ActionContext::new(None),
            &HashMap::from([("name".to_string(), json!("Ada"))]),
        )
        .await
        .unwrap_err();
        match err {
            EngineError::Forbidden { permission } => {
                assert_eq!(permission, "admin.user.create");
            }
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn forbidden_uses_conventional_key_when_unmapped() {
        let err = CrudService::delete(
            &lazy_pool(),
            &schema(),
            &DenyAll,
            &ActionContext::new(None),
            &json!(1),
        )
        .await
        .unwrap_err();
        match err {
            EngineError::Forbidden { permission } => assert_eq!(permission, "user.delete"),
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn validation_failures_precede_database_work() {
        let err = CrudService::create(
            &lazy_pool(),
            &schema(),
            &AllowAll,
            &ActionContext::new(None),
            &HashMap::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn deleted_only_read_requires_soft_delete_schema() {
        let err = CrudService::read(
            &lazy_pool(),
            &schema(),
            &AllowAll,
            &json!(1),
            DeletedScope::Only,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn restore_requires_soft_delete_schema() {
        let err = CrudService::restore(&lazy_pool(), &schema(), &AllowAll, &json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }
}

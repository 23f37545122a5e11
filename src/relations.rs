//! Declarative pivot-table mutations tied to record lifecycle events.
//!
//! Directives run inside the caller's transaction, in declared order. A
//! malformed directive is logged and skipped so one misconfigured
//! relationship cannot block the others; a database failure propagates and
//! rolls back the whole operation, record mutation included.

use crate::error::EngineError;
use crate::schema::resolved::{Relationship, Schema};
use crate::schema::types::{DetachTarget, Directive};
use crate::sql::{pivot_attach, pivot_detach, pivot_related_ids, BindValue, QueryBuf};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    OnCreate,
    OnUpdate,
    OnDelete,
}

impl LifecycleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::OnCreate => "on_create",
            LifecycleEvent::OnUpdate => "on_update",
            LifecycleEvent::OnDelete => "on_delete",
        }
    }
}

/// Values backing the special directive tokens (`now`, `current_user`,
/// `current_date`), supplied by the caller per operation.
#[derive(Clone, Debug)]
pub struct ActionContext {
    pub actor: Option<Value>,
    pub now: DateTime<Utc>,
}

impl ActionContext {
    pub fn new(actor: Option<Value>) -> Self {
        ActionContext {
            actor,
            now: Utc::now(),
        }
    }

    pub fn at(actor: Option<Value>, now: DateTime<Utc>) -> Self {
        ActionContext { actor, now }
    }
}

/// Reasons a single directive is skipped rather than executed. Skips are
/// per-directive; siblings still run.
#[derive(Debug, PartialEq)]
enum Skip {
    NoActor,
    InputFieldAbsent(String),
    NotAnIdArray(String),
    NoPivot,
}

pub struct RelationshipActionProcessor;

impl RelationshipActionProcessor {
    /// Run every directive declared for `event` across all of the schema's
    /// relationships, in declaration order, on the given transaction.
    pub async fn apply(
        tx: &mut PgConnection,
        schema: &Schema,
        event: LifecycleEvent,
        record_id: &Value,
        input: &HashMap<String, Value>,
        ctx: &ActionContext,
    ) -> Result<(), EngineError> {
        for rel in &schema.relationships {
            let directives = match event {
                LifecycleEvent::OnCreate => &rel.actions.on_create,
                LifecycleEvent::OnUpdate => &rel.actions.on_update,
                LifecycleEvent::OnDelete => &rel.actions.on_delete,
            };
            for directive in directives {
                let result =
                    Self::run_directive(tx, schema, rel, directive, record_id, input, ctx).await;
                settle(&schema.model, &rel.name, event, result)?;
            }
        }
        Ok(())
    }

    async fn run_directive(
        tx: &mut PgConnection,
        schema: &Schema,
        rel: &Relationship,
        directive: &Directive,
        record_id: &Value,
        input: &HashMap<String, Value>,
        ctx: &ActionContext,
    ) -> Result<(), DirectiveError> {
        let (pivot, fk, rk) = pivot_keys(rel).ok_or(DirectiveError::Skipped(Skip::NoPivot))?;
        match directive {
            Directive::Attach { related_id, pivot: pivot_data } => {
                let related_id = resolve_token(related_id, ctx)?;
                let mut data = Vec::with_capacity(pivot_data.len());
                for (name, value) in pivot_data {
                    data.push((name.clone(), resolve_token(value, ctx)?));
                }
                let q = pivot_attach(pivot, fk, rk, record_id, &related_id, &data);
                exec(tx, &q).await?;
            }
            Directive::Sync { field } => {
                let Some(value) = input.get(field) else {
                    return Err(DirectiveError::Skipped(Skip::InputFieldAbsent(field.clone())));
                };
                let desired = value
                    .as_array()
                    .ok_or_else(|| DirectiveError::Skipped(Skip::NotAnIdArray(field.clone())))?;
                Self::sync(tx, pivot, fk, rk, record_id, desired).await?;
            }
            Directive::Detach { ids } => {
                let q = match ids {
                    DetachTarget::All(_) => pivot_detach(pivot, fk, rk, record_id, None),
                    DetachTarget::Ids(list) => {
                        if list.is_empty() {
                            return Ok(());
                        }
                        pivot_detach(pivot, fk, rk, record_id, Some(list))
                    }
                };
                exec(tx, &q).await?;
            }
        }
        tracing::debug!(
            model = %schema.model,
            relationship = %rel.name,
            "relationship directive applied"
        );
        Ok(())
    }

    /// Replace the pivot set with exactly `desired`: rows in both sets are
    /// left untouched so their pivot metadata survives.
    async fn sync(
        tx: &mut PgConnection,
        pivot: &str,
        fk: &str,
        rk: &str,
        record_id: &Value,
        desired: &[Value],
    ) -> Result<(), sqlx::Error> {
        let q = pivot_related_ids(pivot, fk, rk, record_id);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(BindValue::from_json(p));
        }
        let rows = query.fetch_all(&mut *tx).await?;
        let existing: Vec<Value> = rows
            .iter()
            .map(crate::sql::row_to_json)
            .filter_map(|row| row.as_object().and_then(|m| m.get(rk)).cloned())
            .collect();

        let (to_add, to_remove) = sync_diff(&existing, desired);
        if !to_remove.is_empty() {
            let q = pivot_detach(pivot, fk, rk, record_id, Some(&to_remove));
            exec(tx, &q).await?;
        }
        for id in &to_add {
            let q = pivot_attach(pivot, fk, rk, record_id, id, &[]);
            exec(tx, &q).await?;
        }
        Ok(())
    }
}

enum DirectiveError {
    Skipped(Skip),
    Db(EngineError),
}

/// Collapse one directive outcome: skips are logged and absorbed so sibling
/// directives still run, database failures abort the whole lifecycle pass
/// (and with it the caller's transaction).
fn settle(
    model: &str,
    relationship: &str,
    event: LifecycleEvent,
    result: Result<(), DirectiveError>,
) -> Result<(), EngineError> {
    match result {
        Ok(()) => Ok(()),
        Err(DirectiveError::Skipped(reason)) => {
            tracing::warn!(
                model = %model,
                relationship = %relationship,
                event = %event.as_str(),
                reason = ?reason,
                "skipping relationship directive"
            );
            Ok(())
        }
        Err(DirectiveError::Db(e)) => Err(e),
    }
}

impl From<sqlx::Error> for DirectiveError {
    fn from(e: sqlx::Error) -> Self {
        DirectiveError::Db(EngineError::from_db(e))
    }
}

fn pivot_keys(rel: &Relationship) -> Option<(&str, &str, &str)> {
    if !rel.has_pivot() {
        return None;
    }
    Some((
        rel.pivot_table.as_deref()?,
        rel.foreign_key.as_deref()?,
        rel.related_key.as_deref()?,
    ))
}

/// Resolve a literal id or one of the special tokens against the action
/// context. An unresolvable token is a per-directive skip.
fn resolve_token(value: &Value, ctx: &ActionContext) -> Result<Value, DirectiveError> {
    match value {
        Value::String(s) => match s.as_str() {
            "now" => Ok(Value::String(ctx.now.to_rfc3339())),
            "current_date" => Ok(Value::String(ctx.now.date_naive().format("%Y-%m-%d").to_string())),
            "current_user" => ctx
                .actor
                .clone()
                .ok_or(DirectiveError::Skipped(Skip::NoActor)),
            _ => Ok(value.clone()),
        },
        _ => Ok(value.clone()),
    }
}

/// Set difference keyed on a canonical id form, so `1` and `"1"` refer to
/// the same pivot row. Returns (ids to insert, ids to delete).
fn sync_diff(existing: &[Value], desired: &[Value]) -> (Vec<Value>, Vec<Value>) {
    let key = |v: &Value| match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let existing_keys: Vec<String> = existing.iter().map(&key).collect();
    let desired_keys: Vec<String> = desired.iter().map(&key).collect();
    let mut to_add = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (v, k) in desired.iter().zip(&desired_keys) {
        if !existing_keys.contains(k) && seen.insert(k.clone()) {
            to_add.push(v.clone());
        }
    }
    let mut to_remove = Vec::new();
    for (v, k) in existing.iter().zip(&existing_keys) {
        if !desired_keys.contains(k) {
            to_remove.push(v.clone());
        }
    }
    (to_add, to_remove)
}

async fn exec(tx: &mut PgConnection, q: &QueryBuf) -> Result<(), sqlx::Error> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(BindValue::from_json(p));
    }
    query.execute(&mut *tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> ActionContext {
        ActionContext::at(
            Some(json!(42)),
            Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap(),
        )
    }

    #[test]
    fn resolves_special_tokens() {
        let c = ctx();
        let now = resolve_token(&json!("now"), &c).ok().unwrap();
        assert_eq!(now, json!("2024-03-15T12:30:00+00:00"));
        let date = resolve_token(&json!("current_date"), &c).ok().unwrap();
        assert_eq!(date, json!("2024-03-15"));
        let user = resolve_token(&json!("current_user"), &c).ok().unwrap();
        assert_eq!(user, json!(42));
    }

    #[test]
    fn literals_pass_through() {
        let c = ctx();
        assert_eq!(resolve_token(&json!(7), &c).ok().unwrap(), json!(7));
        assert_eq!(
            resolve_token(&json!("nowhere"), &c).ok().unwrap(),
            json!("nowhere")
        );
    }

    #[test]
    fn current_user_without_actor_is_a_skip() {
        let c = ActionContext::at(None, ctx().now);
        match resolve_token(&json!("current_user"), &c) {
            Err(DirectiveError::Skipped(Skip::NoActor)) => {}
            _ => panic!("expected NoActor skip"),
        }
    }

    #[test]
    fn sync_diff_preserves_intersection() {
        // sync([B,C]) then sync([C,D]): B removed, C untouched, D added
        let existing = vec![json!("B"), json!("C")];
        let desired = vec![json!("C"), json!("D")];
        let (to_add, to_remove) = sync_diff(&existing, &desired);
        assert_eq!(to_add, vec![json!("D")]);
        assert_eq!(to_remove, vec![json!("B")]);
    }

    #[test]
    fn sync_diff_matches_numbers_against_strings() {
        let existing = vec![json!(1), json!(2)];
        let desired = vec![json!("2"), json!("3")];
        let (to_add, to_remove) = sync_diff(&existing, &desired);
        assert_eq!(to_add, vec![json!("3")]);
        assert_eq!(to_remove, vec![json!(1)]);
    }

    #[test]
    fn sync_diff_ignores_duplicate_desired_ids() {
        let (to_add, to_remove) = sync_diff(&[], &[json!(5), json!(5)]);
        assert_eq!(to_add, vec![json!(5)]);
        assert!(to_remove.is_empty());
    }

    #[test]
    fn skipped_directives_do_not_abort_the_pass() {
        let result = settle(
            "user",
            "roles",
            LifecycleEvent::OnUpdate,
            Err(DirectiveError::Skipped(Skip::InputFieldAbsent(
                "role_ids".into(),
            ))),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn database_failures_propagate_and_abort_the_pass() {
        let result = settle(
            "user",
            "roles",
            LifecycleEvent::OnCreate,
            Err(sqlx::Error::PoolTimedOut.into()),
        );
        assert!(matches!(result, Err(EngineError::Db(_))));
    }

    #[test]
    fn detail_relationships_have_no_pivot_keys() {
        let rel = Relationship {
            name: "orders".into(),
            type_: crate::schema::types::RelationshipType::Detail,
            pivot_table: None,
            foreign_key: None,
            related_key: None,
            through_table: None,
            related_model: None,
            actions: Default::default(),
        };
        assert!(pivot_keys(&rel).is_none());
    }
}

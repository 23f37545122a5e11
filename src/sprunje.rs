//! Generic sort/filter/search/paginate query engine ("sprunje") operating
//! over schema-declared field capabilities. Every requested field and
//! operator is validated against the schema before any SQL is assembled.

use crate::error::EngineError;
use crate::model::{DeletedScope, ModelHandle};
use crate::schema::resolved::{Field, Schema};
use crate::schema::types::{FilterOperator, SortDirection};
use crate::sql::{deleted_predicate, quoted, BindValue, QueryBuf};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

pub const DEFAULT_PER_PAGE: u32 = 100;
pub const MAX_PER_PAGE: u32 = 1000;

#[derive(Clone, Debug)]
pub struct FilterClause {
    pub field: String,
    /// None means the field's first declared operator.
    pub operator: Option<FilterOperator>,
    pub value: Value,
}

#[derive(Clone, Debug, Default)]
pub struct SprunjeRequest {
    pub sorts: Vec<(String, SortDirection)>,
    pub filters: Vec<FilterClause>,
    pub search: Option<String>,
    /// 1-based page number; 0 is treated as 1.
    pub page: u32,
    /// 0 means the default page size; anything above the ceiling is clamped.
    pub per_page: u32,
    pub deleted: DeletedScope,
}

impl SprunjeRequest {
    /// Parse the JSON request surface:
    /// `{sort: {field: "asc"|"desc"}, filters: {field: value | {operator, value}},
    ///   search, page, per_page, deleted: "exclude"|"include"|"only"}`;
    /// the legacy `include_deleted: true` spelling is still accepted.
    pub fn from_value(v: &Value) -> Result<SprunjeRequest, EngineError> {
        let obj = v
            .as_object()
            .ok_or_else(|| EngineError::InvalidRequest("query request must be an object".into()))?;
        let mut req = SprunjeRequest::default();
        if let Some(sort) = obj.get("sort") {
            let sort = sort.as_object().ok_or_else(|| {
                EngineError::InvalidRequest("'sort' must be an object of field: asc|desc".into())
            })?;
            for (field, dir) in sort {
                let dir: SortDirection = serde_json::from_value(dir.clone()).map_err(|_| {
                    EngineError::InvalidRequest(format!(
                        "sort direction for '{}' must be \"asc\" or \"desc\"",
                        field
                    ))
                })?;
                req.sorts.push((field.clone(), dir));
            }
        }
        if let Some(filters) = obj.get("filters") {
            let filters = filters.as_object().ok_or_else(|| {
                EngineError::InvalidRequest("'filters' must be an object keyed by field".into())
            })?;
            for (field, spec) in filters {
                let clause = match spec {
                    Value::Object(m) if m.contains_key("operator") => {
                        let operator =
                            serde_json::from_value(m["operator"].clone()).map_err(|_| {
                                EngineError::InvalidRequest(format!(
                                    "unknown filter operator for '{}'",
                                    field
                                ))
                            })?;
                        FilterClause {
                            field: field.clone(),
                            operator: Some(operator),
                            value: m.get("value").cloned().unwrap_or(Value::Null),
                        }
                    }
                    other => FilterClause {
                        field: field.clone(),
                        operator: None,
                        value: other.clone(),
                    },
                };
                req.filters.push(clause);
            }
        }
        if let Some(s) = obj.get("search") {
            match s {
                Value::Null => {}
                Value::String(text) if !text.trim().is_empty() => {
                    req.search = Some(text.clone());
                }
                Value::String(_) => {}
                _ => {
                    return Err(EngineError::InvalidRequest("'search' must be a string".into()));
                }
            }
        }
        req.page = number_param(obj.get("page"), "page")?;
        req.per_page = number_param(obj.get("per_page"), "per_page")?;
        req.deleted = match obj.get("deleted") {
            None | Some(Value::Null) => DeletedScope::default(),
            Some(Value::String(s)) => DeletedScope::parse(s).ok_or_else(|| {
                EngineError::InvalidRequest(
                    "'deleted' must be \"exclude\", \"include\", or \"only\"".into(),
                )
            })?,
            Some(_) => {
                return Err(EngineError::InvalidRequest("'deleted' must be a string".into()));
            }
        };
        // legacy boolean spelling of the include scope
        if req.deleted == DeletedScope::Exclude
            && obj.get("include_deleted").and_then(Value::as_bool) == Some(true)
        {
            req.deleted = DeletedScope::Include;
        }
        Ok(req)
    }
}

fn number_param(v: Option<&Value>, key: &str) -> Result<u32, EngineError> {
    match v {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| n.min(u32::MAX as u64) as u32)
            .ok_or_else(|| EngineError::InvalidRequest(format!("'{}' must be a non-negative integer", key))),
        Some(Value::String(s)) => s
            .parse::<u32>()
            .map_err(|_| EngineError::InvalidRequest(format!("'{}' must be a non-negative integer", key))),
        Some(_) => Err(EngineError::InvalidRequest(format!(
            "'{}' must be a non-negative integer",
            key
        ))),
    }
}

/// One page of results plus unfiltered and filtered totals, matching the
/// pagination metadata list clients expect.
#[derive(Debug, Serialize)]
pub struct Page {
    pub rows: Vec<Value>,
    pub count: u64,
    pub count_filtered: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Planned queries; exposed separately from execution so the SQL shape is
/// testable without a database.
pub struct QueryPlan {
    pub data: QueryBuf,
    pub count: QueryBuf,
    pub count_filtered: QueryBuf,
    pub page: u32,
    pub per_page: u32,
}

pub struct Sprunje<'a> {
    model: &'a ModelHandle,
    schema: &'a Schema,
}

impl<'a> Sprunje<'a> {
    pub fn new(model: &'a ModelHandle, schema: &'a Schema) -> Self {
        Sprunje { model, schema }
    }

    pub fn plan(&self, req: &SprunjeRequest) -> Result<QueryPlan, EngineError> {
        let table = quoted(&self.model.table);
        let select_cols = self.listable_column_list();
        let order_clause = self.order_clause(req)?;

        if req.deleted == DeletedScope::Only && self.model.soft_delete_column.is_none() {
            return Err(EngineError::InvalidRequest(format!(
                "{}: deleted-only scope requires soft_delete",
                self.schema.model
            )));
        }
        let base_scope = deleted_predicate(self.model, req.deleted);

        let mut data = QueryBuf::new();
        let mut predicates: Vec<String> = base_scope.iter().cloned().collect();
        self.filter_predicates(req, &mut data, &mut predicates)?;
        self.search_predicate(req, &mut data, &mut predicates);
        let where_clause = if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        };

        let per_page = match req.per_page {
            0 => DEFAULT_PER_PAGE,
            n => n.min(MAX_PER_PAGE),
        };
        let page = req.page.max(1);
        let offset = (page as u64 - 1) * per_page as u64;
        data.sql = format!(
            "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
            select_cols, table, where_clause, order_clause, per_page, offset
        );

        // Unfiltered total still honors the soft-delete scope.
        let mut count = QueryBuf::new();
        count.sql = match &base_scope {
            Some(scope) => format!("SELECT COUNT(*) FROM {} WHERE {}", table, scope),
            None => format!("SELECT COUNT(*) FROM {}", table),
        };

        let mut count_filtered = QueryBuf::new();
        let mut filtered_predicates: Vec<String> = base_scope.iter().cloned().collect();
        self.filter_predicates(req, &mut count_filtered, &mut filtered_predicates)?;
        self.search_predicate(req, &mut count_filtered, &mut filtered_predicates);
        count_filtered.sql = if filtered_predicates.is_empty() {
            format!("SELECT COUNT(*) FROM {}", table)
        } else {
            format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                table,
                filtered_predicates.join(" AND ")
            )
        };

        Ok(QueryPlan {
            data,
            count,
            count_filtered,
            page,
            per_page,
        })
    }

    pub async fn run(&self, pool: &PgPool, req: &SprunjeRequest) -> Result<Page, EngineError> {
        let plan = self.plan(req)?;
        let count = fetch_count(pool, &plan.count).await?;
        let count_filtered = fetch_count(pool, &plan.count_filtered).await?;
        tracing::debug!(sql = %plan.data.sql, params = ?plan.data.params, "query");
        let mut query = sqlx::query(&plan.data.sql);
        for p in &plan.data.params {
            query = query.bind(BindValue::from_json(p));
        }
        let rows = query.fetch_all(pool).await.map_err(EngineError::from_db)?;
        Ok(Page {
            rows: rows.iter().map(crate::sql::row_to_json).collect(),
            count,
            count_filtered,
            page: plan.page,
            per_page: plan.per_page,
        })
    }

    /// List queries only ever select listable columns, so fields like
    /// password hashes never appear in a response. The primary key is always
    /// included for stable pagination.
    fn listable_column_list(&self) -> String {
        let mut cols: Vec<String> = Vec::new();
        for f in &self.schema.fields {
            if f.listable || f.name == self.schema.primary_key {
                cols.push(quoted(&f.name));
            }
        }
        cols.join(", ")
    }

    fn order_clause(&self, req: &SprunjeRequest) -> Result<String, EngineError> {
        let sorts: &[(String, SortDirection)] = if req.sorts.is_empty() {
            &self.schema.default_sort
        } else {
            &req.sorts
        };
        let mut parts = Vec::with_capacity(sorts.len() + 1);
        let mut saw_pk = false;
        for (field, dir) in sorts {
            let f = self.sortable_field(field)?;
            if f.name == self.schema.primary_key {
                saw_pk = true;
            }
            parts.push(format!("{} {}", quoted(&f.name), dir.as_sql()));
        }
        // Deterministic pagination: break ties on the primary key.
        if !saw_pk {
            parts.push(format!("{} ASC", quoted(&self.schema.primary_key)));
        }
        Ok(format!(" ORDER BY {}", parts.join(", ")))
    }

    fn sortable_field(&self, name: &str) -> Result<&Field, EngineError> {
        let field = self.schema.field(name).ok_or_else(|| {
            EngineError::InvalidRequest(format!("{}: unknown sort field '{}'", self.schema.model, name))
        })?;
        if !field.sortable {
            return Err(EngineError::InvalidRequest(format!(
                "{}: field '{}' is not sortable",
                self.schema.model, name
            )));
        }
        Ok(field)
    }

    fn filter_predicates(
        &self,
        req: &SprunjeRequest,
        q: &mut QueryBuf,
        predicates: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        for clause in &req.filters {
            let field = self.schema.field(&clause.field).ok_or_else(|| {
                EngineError::InvalidRequest(format!(
                    "{}: unknown filter field '{}'",
                    self.schema.model, clause.field
                ))
            })?;
            if !field.filterable {
                return Err(EngineError::InvalidRequest(format!(
                    "{}: field '{}' is not filterable",
                    self.schema.model, field.name
                )));
            }
            let operator = match clause.operator {
                Some(op) => op,
                None => *field.filter_operators.first().ok_or_else(|| {
                    EngineError::InvalidRequest(format!(
                        "{}: field '{}' declares no filter operators",
                        self.schema.model, field.name
                    ))
                })?,
            };
            if !field.allows_operator(operator) {
                return Err(EngineError::InvalidRequest(format!(
                    "{}: operator '{:?}' is not declared for field '{}'",
                    self.schema.model, operator, field.name
                )));
            }
            predicates.push(self.predicate_for(field, operator, &clause.value, q)?);
        }
        Ok(())
    }

    fn predicate_for(
        &self,
        field: &Field,
        operator: FilterOperator,
        value: &Value,
        q: &mut QueryBuf,
    ) -> Result<String, EngineError> {
        let col = quoted(&field.name);
        let cast = self.model.column(&field.name).and_then(|c| c.pg_cast);
        let bind = |q: &mut QueryBuf, v: Value| {
            let n = q.push_param(v);
            match cast {
                Some(cast) => format!("${}::{}", n, cast),
                None => format!("${}", n),
            }
        };
        Ok(match operator {
            FilterOperator::Equals => format!("{} = {}", col, bind(q, value.clone())),
            FilterOperator::NotEquals => format!("{} <> {}", col, bind(q, value.clone())),
            FilterOperator::Contains => {
                let term = like_term(value, LikeShape::Contains)?;
                format!("{}::text ILIKE {}", col, bind(q, Value::String(term)))
            }
            FilterOperator::StartsWith => {
                let term = like_term(value, LikeShape::Prefix)?;
                format!("{}::text ILIKE {}", col, bind(q, Value::String(term)))
            }
            FilterOperator::Range => {
                let (min, max) = range_bounds(&field.name, value)?;
                match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("{} BETWEEN {} AND {}", col, bind(q, min), bind(q, max))
                    }
                    (Some(min), None) => format!("{} >= {}", col, bind(q, min)),
                    (None, Some(max)) => format!("{} <= {}", col, bind(q, max)),
                    (None, None) => {
                        return Err(EngineError::InvalidRequest(format!(
                            "{}: range filter needs 'min' and/or 'max'",
                            field.name
                        )))
                    }
                }
            }
            FilterOperator::In => {
                let items = value.as_array().ok_or_else(|| {
                    EngineError::InvalidRequest(format!(
                        "{}: 'in' filter value must be an array",
                        field.name
                    ))
                })?;
                if items.is_empty() {
                    // An empty id set matches nothing; keep the query well-formed.
                    "1 = 0".to_string()
                } else {
                    let placeholders: Vec<String> =
                        items.iter().map(|v| bind(q, v.clone())).collect();
                    format!("{} IN ({})", col, placeholders.join(", "))
                }
            }
        })
    }

    /// Free-text search across searchable fields. An empty searchable set
    /// skips search entirely instead of emitting a comparison with no target.
    fn search_predicate(&self, req: &SprunjeRequest, q: &mut QueryBuf, predicates: &mut Vec<String>) {
        let Some(term) = req.search.as_deref() else {
            return;
        };
        let searchable = self.schema.searchable_fields();
        if searchable.is_empty() {
            tracing::debug!(model = %self.schema.model, "no searchable fields; search skipped");
            return;
        }
        let pattern = format!("%{}%", escape_like(term));
        let parts: Vec<String> = searchable
            .iter()
            .map(|f| {
                let n = q.push_param(Value::String(pattern.clone()));
                format!("{}::text ILIKE ${}", quoted(&f.name), n)
            })
            .collect();
        predicates.push(format!("({})", parts.join(" OR ")));
    }
}

async fn fetch_count(pool: &PgPool, q: &QueryBuf) -> Result<u64, EngineError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
    for p in &q.params {
        query = query.bind(BindValue::from_json(p));
    }
    let n = query.fetch_one(pool).await.map_err(EngineError::from_db)?;
    Ok(n.max(0) as u64)
}

enum LikeShape {
    Contains,
    Prefix,
}

fn like_term(value: &Value, shape: LikeShape) -> Result<String, EngineError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => {
            return Err(EngineError::InvalidRequest(
                "text filter value must be a string".into(),
            ))
        }
    };
    let escaped = escape_like(&text);
    Ok(match shape {
        LikeShape::Contains => format!("%{}%", escaped),
        LikeShape::Prefix => format!("{}%", escaped),
    })
}

/// Escape LIKE metacharacters so user input matches literally.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn range_bounds(field: &str, value: &Value) -> Result<(Option<Value>, Option<Value>), EngineError> {
    match value {
        Value::Array(items) if items.len() == 2 => {
            Ok((Some(items[0].clone()), Some(items[1].clone())))
        }
        Value::Object(m) => {
            let min = m.get("min").filter(|v| !v.is_null()).cloned();
            let max = m.get("max").filter(|v| !v.is_null()).cloned();
            Ok((min, max))
        }
        _ => Err(EngineError::InvalidRequest(format!(
            "{}: range filter value must be [min, max] or {{min, max}}",
            field
        ))),
    }
}

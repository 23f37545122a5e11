//! crudkit: schema-driven generic CRUD engine for PostgreSQL.
//!
//! A JSON schema document describes one table: its fields and their
//! capabilities, permissions, relationships, and actions. From that the
//! engine configures a dynamic model, serves context-filtered schema views,
//! builds validated sort/filter/search/paginate queries, and executes
//! declarative pivot-table mutations around record lifecycle events. HTTP
//! routing, authentication, and permission evaluation belong to the caller.

pub mod access;
pub mod error;
pub mod model;
pub mod relations;
pub mod schema;
pub mod service;
pub mod sprunje;
pub mod sql;

pub use access::{authorize, AccessGate, AllowAll};
pub use error::{EngineError, SchemaError};
pub use model::{DeletedScope, ModelHandle};
pub use relations::{ActionContext, LifecycleEvent, RelationshipActionProcessor};
pub use schema::{Context, SchemaCache, SchemaRegistry, SchemaStore};
pub use service::{CrudService, RequestValidator};
pub use sprunje::{Page, Sprunje, SprunjeRequest};

//! Typed errors for the engine. The calling layer owns any HTTP status mapping.

use thiserror::Error;

/// Structural problems in a schema document. Always fatal for that schema,
/// never retried.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("schema '{model}': missing required key '{key}'")]
    MissingKey { model: String, key: &'static str },
    #[error("schema '{model}': identifier '{ident}' is not a valid {kind} name")]
    InvalidIdentifier {
        model: String,
        kind: &'static str,
        ident: String,
    },
    #[error("schema '{model}': field '{field}': {reason}")]
    InvalidField {
        model: String,
        field: String,
        reason: String,
    },
    #[error("schema '{model}': relationship '{relationship}': {reason}")]
    InvalidRelationship {
        model: String,
        relationship: String,
        reason: String,
    },
    #[error("schema '{model}': default sort references '{field}' which is not sortable")]
    UnsortableDefaultSort { model: String, field: String },
    #[error("schema '{model}': duplicate action key '{key}'")]
    DuplicateAction { model: String, key: String },
    #[error("schema '{model}': document declares model name '{declared}'")]
    ModelMismatch { model: String, declared: String },
    #[error("schema '{model}': parse: {source}")]
    Parse {
        model: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("schema '{model}': read: {source}")]
    Io {
        model: String,
        #[source]
        source: std::io::Error,
    },
}

impl SchemaError {
    /// Model name the error refers to, for structured logging at the call site.
    pub fn model(&self) -> &str {
        match self {
            SchemaError::MissingKey { model, .. }
            | SchemaError::InvalidIdentifier { model, .. }
            | SchemaError::InvalidField { model, .. }
            | SchemaError::InvalidRelationship { model, .. }
            | SchemaError::UnsortableDefaultSort { model, .. }
            | SchemaError::DuplicateAction { model, .. }
            | SchemaError::ModelMismatch { model, .. }
            | SchemaError::Parse { model, .. }
            | SchemaError::Io { model, .. } => model,
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Malformed(#[from] SchemaError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {permission}")]
    Forbidden { permission: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

impl EngineError {
    /// Unique-constraint violations surface as Conflict so callers can tell
    /// them apart from transport failures.
    pub fn from_db(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            if db.code().as_deref() == Some("23505") {
                return EngineError::Conflict(db.message().to_string());
            }
        }
        EngineError::Db(e)
    }
}

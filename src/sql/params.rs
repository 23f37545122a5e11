//! Bridging JSON request values onto PostgreSQL bind parameters.
//!
//! Each bound value reports its own wire type through `Encode::produces`, so
//! numbers, uuids, and json documents bind natively rather than round-tripping
//! through text.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, Postgres};

#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Json(Value),
}

impl BindValue {
    /// Classify a JSON value for binding. Strings shaped like uuids bind as
    /// native uuids so they compare against uuid primary keys without a cast.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => BindValue::Int(i),
                None => BindValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => match uuid::Uuid::parse_str(s) {
                Ok(u) => BindValue::Uuid(u),
                Err(_) => BindValue::Text(s.clone()),
            },
            Value::Array(_) | Value::Object(_) => BindValue::Json(v.clone()),
        }
    }

    fn pg_type(&self) -> PgTypeInfo {
        match self {
            BindValue::Null | BindValue::Text(_) => PgTypeInfo::with_name("TEXT"),
            BindValue::Bool(_) => PgTypeInfo::with_name("BOOL"),
            BindValue::Int(_) => PgTypeInfo::with_name("INT8"),
            BindValue::Float(_) => PgTypeInfo::with_name("FLOAT8"),
            BindValue::Uuid(_) => PgTypeInfo::with_name("UUID"),
            BindValue::Json(_) => PgTypeInfo::with_name("JSONB"),
        }
    }
}

impl<'q> Encode<'q, Postgres> for BindValue {
    fn encode_by_ref(
        &self,
        buf: &mut PgArgumentBuffer,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            BindValue::Null => Ok(IsNull::Yes),
            BindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            BindValue::Int(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            BindValue::Float(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            BindValue::Text(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf),
            BindValue::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf),
            BindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(self.pg_type())
    }
}

impl sqlx::Type<Postgres> for BindValue {
    // Fallback only; `produces` reports the real type per value.
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

//! Request validation from schema field rules.

use crate::error::EngineError;
use crate::schema::resolved::{Field, Schema};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a create body: every required editable field must be present
    /// and non-null, and present values must satisfy their field rules.
    pub fn validate(schema: &Schema, body: &HashMap<String, Value>) -> Result<(), EngineError> {
        for field in schema.fields.iter().filter(|f| f.is_fillable()) {
            let val = body.get(&field.name);
            let required = field.required || field.validation.required == Some(true);
            if required && (val.is_none() || val == Some(&Value::Null)) {
                return Err(EngineError::InvalidRequest(format!(
                    "{}.{} is required",
                    schema.model, field.name
                )));
            }
            if let Some(v) = val {
                validate_field(schema, field, v)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in the body (partial update);
    /// required is not enforced for missing fields.
    pub fn validate_partial(schema: &Schema, body: &HashMap<String, Value>) -> Result<(), EngineError> {
        for (name, v) in body {
            if let Some(field) = schema.field(name) {
                validate_field(schema, field, v)?;
            }
        }
        Ok(())
    }
}

fn validate_field(schema: &Schema, field: &Field, v: &Value) -> Result<(), EngineError> {
    if v.is_null() {
        return Ok(());
    }
    let rule = &field.validation;
    let fail = |msg: String| {
        EngineError::InvalidRequest(format!("{}.{}: {}", schema.model, field.name, msg))
    };
    if let Some(format) = &rule.format {
        validate_format(v, format).map_err(&fail)?;
    }
    if let Some(s) = v.as_str() {
        if let Some(max) = rule.max_length {
            if s.chars().count() > max as usize {
                return Err(fail(format!("must be at most {} characters", max)));
            }
        }
        if let Some(min) = rule.min_length {
            if s.chars().count() < min as usize {
                return Err(fail(format!("must be at least {} characters", min)));
            }
        }
        if let Some(pattern) = &rule.pattern {
            let re = Regex::new(pattern).map_err(|_| fail("invalid validation pattern".into()))?;
            if !re.is_match(s) {
                return Err(fail("does not match required pattern".into()));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(fail(format!(
                "must be one of: {:?}",
                allowed.iter().take(5).collect::<Vec<_>>()
            )));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(fail(format!("must be at least {}", min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(fail(format!("must be at most {}", max)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(v: &Value, format: &str) -> Result<(), String> {
    let Some(s) = v.as_str() else { return Ok(()) };
    match format.to_lowercase().as_str() {
        "email" => {
            if !s.contains('@') || s.len() < 3 {
                return Err("must be a valid email".into());
            }
        }
        "uuid" => {
            if uuid::Uuid::parse_str(s).is_err() {
                return Err("must be a valid UUID".into());
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::normalize::normalize;
    use crate::schema::resolved::resolve;
    use serde_json::json;

    fn schema() -> Schema {
        let doc = serde_json::from_value(json!({
            "model": "user",
            "table": "users",
            "fields": {
                "id": {"type": "integer", "auto_increment": true, "readonly": true},
                "name": {"type": "string", "required": true,
                         "validation": {"min_length": 2, "max_length": 10}},
                "email": {"type": "string", "validation": {"format": "email"}},
                "status": {"type": "string", "validation": {"allowed": ["active", "blocked"]}},
                "age": {"type": "integer", "validation": {"minimum": 0.0, "maximum": 150.0}}
            }
        }))
        .unwrap();
        resolve(normalize(doc)).unwrap()
    }

    #[test]
    fn required_field_must_be_present_on_create() {
        let err = RequestValidator::validate(&schema(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
        assert!(err.to_string().contains("user.name is required"));
    }

    #[test]
    fn partial_update_skips_missing_required_fields() {
        let body = HashMap::from([("email".to_string(), json!("a@b.c"))]);
        assert!(RequestValidator::validate_partial(&schema(), &body).is_ok());
    }

    #[test]
    fn enforces_length_allowed_and_bounds() {
        let s = schema();
        let base = HashMap::from([("name".to_string(), json!("Ada"))]);
        assert!(RequestValidator::validate(&s, &base).is_ok());

        let long = HashMap::from([("name".to_string(), json!("much too long a name"))]);
        assert!(RequestValidator::validate(&s, &long).is_err());

        let mut bad_status = base.clone();
        bad_status.insert("status".into(), json!("paused"));
        assert!(RequestValidator::validate(&s, &bad_status).is_err());

        let mut bad_age = base.clone();
        bad_age.insert("age".into(), json!(200));
        assert!(RequestValidator::validate(&s, &bad_age).is_err());

        let mut bad_email = base;
        bad_email.insert("email".into(), json!("not-an-email"));
        assert!(RequestValidator::validate(&s, &bad_email).is_err());
    }
}

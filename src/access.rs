//! Access gate boundary. Permission evaluation lives outside the engine;
//! the engine only asks "may the current subject do this" once per
//! operation, before any mutation.

use crate::error::EngineError;
use crate::schema::resolved::Schema;

pub trait AccessGate: Send + Sync {
    fn check(&self, permission_key: &str) -> bool;
}

/// Gate that permits everything; useful for trusted internal callers and tests.
pub struct AllowAll;

impl AccessGate for AllowAll {
    fn check(&self, _permission_key: &str) -> bool {
        true
    }
}

/// Resolve the permission key for an action from the schema's permission map
/// (conventional `{model}.{action}` fallback) and consult the gate.
pub fn authorize(gate: &dyn AccessGate, schema: &Schema, action: &str) -> Result<(), EngineError> {
    let permission = schema.permission_for(action);
    if gate.check(&permission) {
        Ok(())
    } else {
        Err(EngineError::Forbidden { permission })
    }
}

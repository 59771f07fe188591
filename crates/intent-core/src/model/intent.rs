use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ExecutionContext;
use crate::errors::IntentError;

/// Params específicos del handler: siempre un objeto JSON.
pub type Params = Map<String, Value>;

/// Unidad de trabajo solicitada. Inmutable una vez enviada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_type: String,
    pub params: Params,
    pub context: ExecutionContext,
}

impl Intent {
    pub fn new(intent_type: impl Into<String>, params: Params, context: ExecutionContext) -> Self {
        Self { intent_type: intent_type.into(),
               params,
               context }
    }

    /// Convierte un `Value` arbitrario en `Params`; cualquier cosa que no sea
    /// objeto (o null, tratado como vacío) es un error de validación.
    pub fn params_from_value(value: Value) -> Result<Params, IntentError> {
        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Params::new()),
            other => Err(IntentError::Validation(format!("params must be a JSON object, got {}", json_kind(&other)))),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::IntentError;

/// Contexto propagado sin cambios a lo largo de una journey.
///
/// `execution_id` se genera una vez por envío de nivel superior y es la clave
/// de correlación de registros WAL y eventos. Los steps de una journey usan un
/// contexto hijo cuyo `execution_id` es `{padre}/{step}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub tenant_id: String,
    pub session_id: String,
    pub execution_id: String,
    pub parent_execution_id: Option<String>,
}

impl ExecutionContext {
    /// Contexto raíz con un `execution_id` nuevo.
    pub fn root(tenant_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self { tenant_id: tenant_id.into(),
               session_id: session_id.into(),
               execution_id: Uuid::new_v4().to_string(),
               parent_execution_id: None }
    }

    /// Contexto de un step de journey.
    pub fn child(&self, step_name: &str) -> Self {
        Self { tenant_id: self.tenant_id.clone(),
               session_id: self.session_id.clone(),
               execution_id: format!("{}/{}", self.execution_id, step_name),
               parent_execution_id: Some(self.execution_id.clone()) }
    }

    /// Nombre del step si este contexto pertenece a una journey.
    pub fn step_name(&self) -> Option<&str> {
        let parent = self.parent_execution_id.as_deref()?;
        self.execution_id.strip_prefix(parent)?.strip_prefix('/')
    }

    /// Ámbito adicional del fingerprint: los steps de journey deduplican sólo
    /// dentro de su propio `execution_id`; los envíos raíz no tienen ámbito.
    pub fn idempotency_scope(&self) -> Option<&str> {
        self.parent_execution_id.as_ref().map(|_| self.execution_id.as_str())
    }

    pub fn validate(&self) -> Result<(), IntentError> {
        if self.tenant_id.trim().is_empty() {
            return Err(IntentError::Validation("tenant_id is required".into()));
        }
        if self.session_id.trim().is_empty() {
            return Err(IntentError::Validation("session_id is required".into()));
        }
        if self.execution_id.trim().is_empty() {
            return Err(IntentError::Validation("execution_id is required".into()));
        }
        Ok(())
    }
}

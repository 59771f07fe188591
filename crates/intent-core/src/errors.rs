//! Taxonomía de errores del runtime.
//!
//! Todos los errores de componentes (store de artifacts, ledger, WAL,
//! registry, journeys) convergen en `IntentError`, que es lo que ve el
//! llamador. `classify_error` decide si un fallo de step es reintentable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum IntentError {
    /// Input mal formado. Nunca consume estado de idempotencia.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Registro duplicado o ciclo de lineage.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Fallo interno del handler.
    #[error("execution {execution_id} failed: {cause}")]
    Runtime {
        execution_id: String,
        cause: String,
        /// `true` cuando el handler declaró que reintentar no tiene sentido.
        permanent: bool,
    },
    #[error("execution {execution_id} timed out after {after_ms}ms")]
    Timeout { execution_id: String, after_ms: u64 },
    /// WAL / ledger / store no disponibles. Fatal para el intento en curso.
    #[error("storage unavailable: {0}")]
    Storage(String),
}

/// Códigos expuestos en la interfaz externa (`error_code`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Conflict,
    RuntimeError,
    Timeout,
    StorageError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::RuntimeError => "RUNTIME_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::StorageError => "STORAGE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IntentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            IntentError::Validation(_) => ErrorCode::ValidationError,
            IntentError::NotFound(_) => ErrorCode::NotFound,
            IntentError::Conflict(_) => ErrorCode::Conflict,
            IntentError::Runtime { .. } => ErrorCode::RuntimeError,
            IntentError::Timeout { .. } => ErrorCode::Timeout,
            IntentError::Storage(_) => ErrorCode::StorageError,
        }
    }

    /// `execution_id` asociado cuando el error ocurrió durante una ejecución.
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            IntentError::Runtime { execution_id, .. } | IntentError::Timeout { execution_id, .. } => Some(execution_id),
            _ => None,
        }
    }
}

/// Clasificación gruesa usada por la política de reintentos de steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Runtime,
    Transient,
    Permanent,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Runtime | ErrorClass::Transient)
    }
}

pub fn classify_error(err: &IntentError) -> ErrorClass {
    match err {
        IntentError::Validation(_) => ErrorClass::Validation,
        IntentError::Runtime { permanent: true, .. } => ErrorClass::Permanent,
        IntentError::Runtime { .. } => ErrorClass::Runtime,
        IntentError::Timeout { .. } | IntentError::Storage(_) => ErrorClass::Transient,
        IntentError::NotFound(_) | IntentError::Conflict(_) => ErrorClass::Permanent,
    }
}

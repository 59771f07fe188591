use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::event_types;

/// Evento de dominio correlacionado por `execution_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub execution_id: String,
    pub step_name: Option<String>,
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(execution_id: impl Into<String>,
               step_name: Option<String>,
               event_type: impl Into<String>,
               payload: Value,
               timestamp: DateTime<Utc>)
               -> Self {
        Self { execution_id: execution_id.into(),
               step_name,
               event_type: event_type.into(),
               payload,
               timestamp }
    }

    /// Último evento de una ejecución (intent suelto o journey). Los eventos
    /// de step nunca son terminales aunque el step falle.
    pub fn is_terminal(&self) -> bool {
        self.step_name.is_none()
        && matches!(self.event_type.as_str(),
                    event_types::INTENT_COMPLETED
                    | event_types::INTENT_FAILED
                    | event_types::JOURNEY_COMPLETED
                    | event_types::JOURNEY_FAILED
                    | event_types::JOURNEY_CANCELLED)
    }
}

/// Evento emitido por un handler; el executor le agrega correlación y
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub event_type: String,
    pub payload: Value,
}

impl EventDraft {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self { event_type: event_type.into(),
               payload }
    }
}

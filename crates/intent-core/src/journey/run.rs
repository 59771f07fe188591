//! Estado de una ejecución de journey reconstruido desde el WAL.
//!
//! `JourneyRun` es un cache: el driver lo actualiza aplicando exactamente los
//! registros que acaba de agregar, y `replay` aplica los mismos registros
//! desde cero, por lo que ambos caminos producen el mismo valor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{JourneyDefinition, JourneyError};
use crate::constants::event_types;
use crate::events::DomainEvent;
use crate::model::{ArtifactId, ExecutionContext, Params};
use crate::wal::{JourneyStatus, NewWalRecord, RecordState, StepState, WalRecord};

/// Payload del primer registro de una ejecución.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyStart {
    pub journey_id: String,
    pub definition_hash: String,
    pub params: Params,
    pub context: ExecutionContext,
}

impl JourneyStart {
    pub fn record(&self) -> NewWalRecord {
        NewWalRecord::journey(&self.context.execution_id, None, JourneyStatus::Running)
            .with_payload(serde_json::to_value(self).unwrap_or(Value::Null))
    }

    pub fn from_record(rec: &WalRecord) -> Result<Self, JourneyError> {
        let invalid = |reason: String| JourneyError::InvalidRecord { execution_id: rec.execution_id.clone(),
                                                                      reason };
        if rec.step_name.is_some() || rec.from_state.is_some() || rec.to_state != RecordState::Running {
            return Err(invalid(format!("first record (seq {}) is not a journey start", rec.seq)));
        }
        let payload = rec.payload_ref.clone().ok_or_else(|| invalid("journey start without payload".into()))?;
        serde_json::from_value(payload).map_err(|e| invalid(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyRun {
    pub journey_id: String,
    pub execution_id: String,
    pub definition_hash: String,
    pub context: ExecutionContext,
    pub params: Params,
    pub status: JourneyStatus,
    pub step_states: BTreeMap<String, StepState>,
    /// Ids de artifacts producidos por cada step DONE.
    pub outputs: BTreeMap<String, Vec<ArtifactId>>,
    /// Invocaciones iniciadas por step (los re-encolados por recovery no
    /// cuentan).
    pub attempts: BTreeMap<String, u32>,
    /// Último error por step.
    pub errors: BTreeMap<String, String>,
}

fn payload_str(rec: &WalRecord, key: &str) -> Option<String> {
    rec.payload_ref.as_ref()?.get(key)?.as_str().map(str::to_string)
}

impl JourneyRun {
    pub fn new(definition: &JourneyDefinition, start: JourneyStart) -> Self {
        Self { journey_id: start.journey_id,
               execution_id: start.context.execution_id.clone(),
               definition_hash: start.definition_hash,
               context: start.context,
               params: start.params,
               status: JourneyStatus::Running,
               step_states: definition.steps().map(|s| (s.name.clone(), StepState::Pending)).collect(),
               outputs: BTreeMap::new(),
               attempts: BTreeMap::new(),
               errors: BTreeMap::new() }
    }

    /// Reconstruye el estado aplicando `records` (en orden de append).
    pub fn replay(definition: &JourneyDefinition, records: &[WalRecord]) -> Result<Self, JourneyError> {
        let (first, rest) = records.split_first()
                                   .ok_or_else(|| JourneyError::UnknownExecution("<empty wal slice>".into()))?;
        let start = JourneyStart::from_record(first)?;
        if start.journey_id != definition.journey_id() {
            return Err(JourneyError::InvalidRecord { execution_id: first.execution_id.clone(),
                                                     reason: format!("recorded journey '{}' replayed with '{}'",
                                                                     start.journey_id,
                                                                     definition.journey_id()) });
        }
        if start.definition_hash != definition.definition_hash() {
            return Err(JourneyError::DefinitionMismatch { execution_id: first.execution_id.clone(),
                                                          recorded: start.definition_hash,
                                                          current: definition.definition_hash().to_string() });
        }
        let mut run = Self::new(definition, start);
        for rec in rest {
            run.apply(rec)?;
        }
        Ok(run)
    }

    /// Aplica un registro. Los registros de step se aplican aun con la
    /// journey terminada (steps que terminan después de una cancelación).
    pub fn apply(&mut self, rec: &WalRecord) -> Result<(), JourneyError> {
        let invalid = |reason: String| JourneyError::InvalidRecord { execution_id: rec.execution_id.clone(),
                                                                      reason };
        if rec.execution_id != self.execution_id {
            return Err(invalid(format!("record for {} applied to {}", rec.execution_id, self.execution_id)));
        }
        let Some(step) = rec.step_name.as_deref() else {
            let status = rec.to_state
                            .as_journey()
                            .ok_or_else(|| invalid(format!("{} is not a journey status", rec.to_state.as_str())))?;
            if self.status.is_terminal() {
                log::warn!("journey {} already {:?}; ignoring {:?}", self.execution_id, self.status, status);
            } else {
                self.status = status;
            }
            return Ok(());
        };
        let to = rec.to_state
                    .as_step()
                    .ok_or_else(|| invalid(format!("{} is not a step state", rec.to_state.as_str())))?;
        let slot = self.step_states
                       .get_mut(step)
                       .ok_or_else(|| invalid(format!("unknown step '{step}'")))?;
        let from = *slot;
        *slot = to;
        match to {
            StepState::Running => *self.attempts.entry(step.to_string()).or_insert(0) += 1,
            StepState::Pending if from == StepState::Running => {
                let recovered = rec.payload_ref
                                   .as_ref()
                                   .and_then(|p| p.get("recovered"))
                                   .and_then(Value::as_bool)
                                   .unwrap_or(false);
                if recovered {
                    if let Some(n) = self.attempts.get_mut(step) {
                        *n = n.saturating_sub(1);
                    }
                } else if let Some(err) = payload_str(rec, "error") {
                    self.errors.insert(step.to_string(), err);
                }
            }
            StepState::Done => {
                let ids = rec.payload_ref
                             .as_ref()
                             .and_then(|p| p.get("artifacts"))
                             .and_then(|v| serde_json::from_value::<Vec<ArtifactId>>(v.clone()).ok())
                             .unwrap_or_default();
                self.outputs.insert(step.to_string(), ids);
                self.errors.remove(step);
            }
            StepState::Failed | StepState::Skipped => {
                if let Some(err) = payload_str(rec, "error").or_else(|| payload_str(rec, "reason")) {
                    self.errors.insert(step.to_string(), err);
                }
            }
            StepState::Pending => {}
        }
        Ok(())
    }

    pub fn state(&self, step: &str) -> Option<StepState> {
        self.step_states.get(step).copied()
    }

    pub fn attempts(&self, step: &str) -> u32 {
        self.attempts.get(step).copied().unwrap_or(0)
    }

    /// Steps PENDING con todas sus dependencias DONE, en orden topológico.
    pub fn eligible_steps(&self, definition: &JourneyDefinition) -> Vec<String> {
        self.pending_where(definition, |deps| deps.iter().all(|d| *d == Some(StepState::Done)))
    }

    /// Steps PENDING con alguna dependencia FAILED o SKIPPED: nunca podrán
    /// correr.
    pub fn blocked_steps(&self, definition: &JourneyDefinition) -> Vec<String> {
        self.pending_where(definition, |deps| {
                deps.iter()
                    .any(|d| matches!(d, Some(StepState::Failed) | Some(StepState::Skipped)))
            })
    }

    fn pending_where<F>(&self, definition: &JourneyDefinition, pred: F) -> Vec<String>
        where F: Fn(&[Option<StepState>]) -> bool
    {
        definition.topo_order()
                  .iter()
                  .filter(|name| self.state(name) == Some(StepState::Pending))
                  .filter(|name| {
                      let deps: Vec<Option<StepState>> = definition.step(name)
                                                                   .map(|s| s.depends_on.iter().map(|d| self.state(d)).collect())
                                                                   .unwrap_or_default();
                      pred(&deps)
                  })
                  .cloned()
                  .collect()
    }

    pub fn running_steps(&self) -> Vec<String> {
        self.steps_in(StepState::Running)
    }

    pub fn steps_in(&self, state: StepState) -> Vec<String> {
        self.step_states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn all_done(&self) -> bool {
        self.step_states.values().all(|s| *s == StepState::Done)
    }
}

/// Evento publicado para un registro recién agregado.
pub fn event_for(rec: &WalRecord) -> DomainEvent {
    let event_type = match (&rec.step_name, rec.to_state) {
        (None, RecordState::Running) => event_types::JOURNEY_STARTED,
        (None, RecordState::Completed) => event_types::JOURNEY_COMPLETED,
        (None, RecordState::Cancelled) => event_types::JOURNEY_CANCELLED,
        (None, _) => event_types::JOURNEY_FAILED,
        (Some(_), RecordState::Running) => event_types::STEP_RUNNING,
        (Some(_), RecordState::Done) => event_types::STEP_DONE,
        (Some(_), RecordState::Skipped) => event_types::STEP_SKIPPED,
        (Some(_), RecordState::Pending) => event_types::STEP_RETRY,
        (Some(_), _) => event_types::STEP_FAILED,
    };
    let mut payload = match &rec.payload_ref {
        Some(Value::Object(m)) => Value::Object(m.clone()),
        Some(other) => json!({ "value": other }),
        None => json!({}),
    };
    if let Value::Object(m) = &mut payload {
        m.insert("seq".into(), json!(rec.seq));
        m.insert("to_state".into(), json!(rec.to_state));
    }
    DomainEvent::new(&rec.execution_id, rec.step_name.clone(), event_type, payload, rec.timestamp)
}

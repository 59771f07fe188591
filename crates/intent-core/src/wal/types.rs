use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::IntentError;

/// Estado de un step dentro de una journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Done | StepState::Failed | StepState::Skipped)
    }
}

/// Estado global de una ejecución de journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JourneyStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JourneyStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JourneyStatus::Running)
    }
}

/// Estado tal como se persiste en el WAL. Une los estados de step y de
/// journey: un registro con `step_name` describe un step, uno sin `step_name`
/// describe la journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
    Completed,
    Cancelled,
}

impl RecordState {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordState::Pending => "PENDING",
            RecordState::Running => "RUNNING",
            RecordState::Done => "DONE",
            RecordState::Failed => "FAILED",
            RecordState::Skipped => "SKIPPED",
            RecordState::Completed => "COMPLETED",
            RecordState::Cancelled => "CANCELLED",
        }
    }

    pub fn as_step(self) -> Option<StepState> {
        match self {
            RecordState::Pending => Some(StepState::Pending),
            RecordState::Running => Some(StepState::Running),
            RecordState::Done => Some(StepState::Done),
            RecordState::Failed => Some(StepState::Failed),
            RecordState::Skipped => Some(StepState::Skipped),
            RecordState::Completed | RecordState::Cancelled => None,
        }
    }

    pub fn as_journey(self) -> Option<JourneyStatus> {
        match self {
            RecordState::Running => Some(JourneyStatus::Running),
            RecordState::Completed => Some(JourneyStatus::Completed),
            RecordState::Failed => Some(JourneyStatus::Failed),
            RecordState::Cancelled => Some(JourneyStatus::Cancelled),
            _ => None,
        }
    }
}

impl From<StepState> for RecordState {
    fn from(s: StepState) -> Self {
        match s {
            StepState::Pending => RecordState::Pending,
            StepState::Running => RecordState::Running,
            StepState::Done => RecordState::Done,
            StepState::Failed => RecordState::Failed,
            StepState::Skipped => RecordState::Skipped,
        }
    }
}

impl From<JourneyStatus> for RecordState {
    fn from(s: JourneyStatus) -> Self {
        match s {
            JourneyStatus::Running => RecordState::Running,
            JourneyStatus::Completed => RecordState::Completed,
            JourneyStatus::Failed => RecordState::Failed,
            JourneyStatus::Cancelled => RecordState::Cancelled,
        }
    }
}

impl FromStr for RecordState {
    type Err = WalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PENDING" => RecordState::Pending,
            "RUNNING" => RecordState::Running,
            "DONE" => RecordState::Done,
            "FAILED" => RecordState::Failed,
            "SKIPPED" => RecordState::Skipped,
            "COMPLETED" => RecordState::Completed,
            "CANCELLED" => RecordState::Cancelled,
            other => return Err(WalError::Storage(format!("unknown record state '{other}'"))),
        })
    }
}

/// Registro a agregar; `seq` y `timestamp` los asigna el backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWalRecord {
    pub execution_id: String,
    pub step_name: Option<String>,
    pub from_state: Option<RecordState>,
    pub to_state: RecordState,
    pub payload_ref: Option<Value>,
}

impl NewWalRecord {
    pub fn step(execution_id: &str, step: &str, from: StepState, to: StepState) -> Self {
        Self { execution_id: execution_id.to_string(),
               step_name: Some(step.to_string()),
               from_state: Some(from.into()),
               to_state: to.into(),
               payload_ref: None }
    }

    pub fn journey(execution_id: &str, from: Option<JourneyStatus>, to: JourneyStatus) -> Self {
        Self { execution_id: execution_id.to_string(),
               step_name: None,
               from_state: from.map(Into::into),
               to_state: to.into(),
               payload_ref: None }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload_ref = Some(payload);
        self
    }
}

/// Registro persistido. Nunca se modifica ni se borra.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub execution_id: String,
    pub step_name: Option<String>,
    pub from_state: Option<RecordState>,
    pub to_state: RecordState,
    pub timestamp: DateTime<Utc>,
    pub payload_ref: Option<Value>,
}

impl WalRecord {
    pub fn from_new(seq: u64, timestamp: DateTime<Utc>, rec: NewWalRecord) -> Self {
        Self { seq,
               execution_id: rec.execution_id,
               step_name: rec.step_name,
               from_state: rec.from_state,
               to_state: rec.to_state,
               timestamp,
               payload_ref: rec.payload_ref }
    }

    /// Registro de journey que la cierra (COMPLETED/FAILED/CANCELLED).
    pub fn is_terminal(&self) -> bool {
        self.step_name.is_none() && self.to_state.as_journey().is_some_and(JourneyStatus::is_terminal)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalError {
    #[error("wal io: {0}")]
    Io(String),
    /// Registro ilegible en medio del log (no es una cola truncada).
    #[error("wal corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("wal storage: {0}")]
    Storage(String),
}

impl From<std::io::Error> for WalError {
    fn from(e: std::io::Error) -> Self {
        WalError::Io(e.to_string())
    }
}

impl From<WalError> for IntentError {
    fn from(e: WalError) -> Self {
        IntentError::Storage(e.to_string())
    }
}

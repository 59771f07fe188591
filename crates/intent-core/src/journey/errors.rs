use thiserror::Error;

use crate::errors::IntentError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JourneyError {
    #[error("journey '{0}' has no steps")]
    Empty(String),
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("journey '{journey}' declares step '{step}' twice")]
    DuplicateStep { journey: String, step: String },
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },
    #[error("journey '{journey}' has a dependency cycle among {steps:?}")]
    Cycle { journey: String, steps: Vec<String> },
    #[error("journey '{0}' already composed")]
    DuplicateJourney(String),
    #[error("unknown journey '{0}'")]
    UnknownJourney(String),
    #[error("unknown execution '{0}'")]
    UnknownExecution(String),
    #[error("step '{step}' references unregistered intent type '{intent_type}'")]
    UnknownIntentType { step: String, intent_type: String },
    /// La definición registrada cambió desde que la ejecución empezó.
    #[error("execution {execution_id} was started with definition {recorded}, registered definition is {current}")]
    DefinitionMismatch {
        execution_id: String,
        recorded: String,
        current: String,
    },
    #[error("execution {execution_id} is already {status}")]
    AlreadyTerminal { execution_id: String, status: String },
    #[error("execution {execution_id}: unreadable wal record: {reason}")]
    InvalidRecord { execution_id: String, reason: String },
}

impl From<JourneyError> for IntentError {
    fn from(e: JourneyError) -> Self {
        match e {
            JourneyError::Empty(_)
            | JourneyError::InvalidName(_)
            | JourneyError::DuplicateStep { .. }
            | JourneyError::UnknownDependency { .. }
            | JourneyError::Cycle { .. } => IntentError::Validation(e.to_string()),
            JourneyError::DuplicateJourney(_)
            | JourneyError::DefinitionMismatch { .. }
            | JourneyError::AlreadyTerminal { .. } => IntentError::Conflict(e.to_string()),
            JourneyError::UnknownJourney(_)
            | JourneyError::UnknownExecution(_)
            | JourneyError::UnknownIntentType { .. } => IntentError::NotFound(e.to_string()),
            JourneyError::InvalidRecord { .. } => IntentError::Storage(e.to_string()),
        }
    }
}

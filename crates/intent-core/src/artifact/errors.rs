use thiserror::Error;

use crate::errors::IntentError;
use crate::model::{ArtifactId, LifecycleState};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact {0} not found")]
    NotFound(ArtifactId),
    #[error("artifact {0} already registered")]
    Duplicate(ArtifactId),
    /// `via` es el padre desde el cual se alcanzó el id nuevo.
    #[error("registering {id} would introduce a lineage cycle through {via}")]
    Cycle { id: ArtifactId, via: ArtifactId },
    #[error("artifact {id}: illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        id: ArtifactId,
        from: LifecycleState,
        to: LifecycleState,
    },
    /// Registro nuevo que no llega en PENDING.
    #[error("artifact {id} must be registered as PENDING, got {state:?}")]
    NotPending { id: ArtifactId, state: LifecycleState },
    #[error("artifact storage: {0}")]
    Storage(String),
}

impl From<ArtifactError> for IntentError {
    fn from(e: ArtifactError) -> Self {
        match e {
            ArtifactError::NotFound(_) => IntentError::NotFound(e.to_string()),
            ArtifactError::Duplicate(_) | ArtifactError::Cycle { .. } | ArtifactError::InvalidTransition { .. } => {
                IntentError::Conflict(e.to_string())
            }
            ArtifactError::NotPending { .. } => IntentError::Validation(e.to_string()),
            ArtifactError::Storage(msg) => IntentError::Storage(msg),
        }
    }
}

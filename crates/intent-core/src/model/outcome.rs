use serde::{Deserialize, Serialize};

use super::{Artifact, ArtifactId};
use crate::events::DomainEvent;

/// Resultado de ejecutar un intent. Es lo que guarda el ledger y lo que
/// observan todos los llamadores de un mismo fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Ejecución que efectivamente invocó al handler.
    pub execution_id: String,
    pub artifacts: Vec<Artifact>,
    pub events: Vec<DomainEvent>,
}

impl Outcome {
    pub fn artifact_ids(&self) -> Vec<ArtifactId> {
        self.artifacts.iter().map(|a| a.id.clone()).collect()
    }
}

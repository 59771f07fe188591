use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::artifact::ArtifactStore;
use crate::clock::Clock;
use crate::errors::IntentError;
use crate::model::{Artifact, ArtifactDraft, ArtifactId, LifecycleState, ProducedBy};

/// Registra artifacts en nombre de una única invocación de handler y
/// recuerda cuáles creó, para poder marcarlos FAILED si la invocación falla.
pub struct ArtifactStager {
    store: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    tenant_id: String,
    produced_by: ProducedBy,
    default_parents: BTreeSet<ArtifactId>,
    staged: Mutex<Staged>,
}

/// Lista y cierre bajo el mismo lock: un id entra a la lista sólo si el
/// stager seguía abierto en ese instante.
#[derive(Default)]
struct Staged {
    ids: Vec<ArtifactId>,
    closed: bool,
}

impl ArtifactStager {
    pub(crate) fn new(store: Arc<dyn ArtifactStore>,
                      clock: Arc<dyn Clock>,
                      tenant_id: String,
                      produced_by: ProducedBy,
                      default_parents: BTreeSet<ArtifactId>)
                      -> Self {
        Self { store,
               clock,
               tenant_id,
               produced_by,
               default_parents,
               staged: Mutex::new(Staged::default()) }
    }

    /// Materializa un draft. Sin padres explícitos hereda los inputs.
    pub(crate) fn build(&self, draft: ArtifactDraft) -> Artifact {
        let parents = if draft.parent_artifact_ids.is_empty() {
            self.default_parents.clone()
        } else {
            draft.parent_artifact_ids
        };
        Artifact { id: draft.id.unwrap_or_else(ArtifactId::generate),
                   artifact_type: draft.artifact_type,
                   tenant_id: self.tenant_id.clone(),
                   lifecycle_state: LifecycleState::Pending,
                   produced_by: self.produced_by.clone(),
                   parent_artifact_ids: parents,
                   semantic_payload: draft.semantic_payload,
                   created_at: self.clock.now() }
    }

    pub(crate) async fn stage(&self, draft: ArtifactDraft) -> Result<ArtifactId, IntentError> {
        if self.lock().closed {
            return Err(self.closed_error());
        }
        let artifact = self.build(draft);
        let id = artifact.id.clone();
        self.store.register(artifact).await?;
        let accepted = {
            let mut staged = self.lock();
            if !staged.closed {
                staged.ids.push(id.clone());
            }
            !staged.closed
        };
        if !accepted {
            // se cerró mientras registrábamos
            if let Err(e) = self.store.transition(&id, LifecycleState::Failed).await {
                log::warn!("late artifact {} could not be marked FAILED: {}", id, e);
            }
            return Err(self.closed_error());
        }
        Ok(id)
    }

    /// Cierra el stager y devuelve lo registrado hasta ahora.
    pub(crate) fn close(&self) -> Vec<ArtifactId> {
        let mut staged = self.lock();
        staged.closed = true;
        staged.ids.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Staged> {
        self.staged.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn closed_error(&self) -> IntentError {
        IntentError::Conflict(format!("execution {} no longer accepts artifacts", self.produced_by.execution_id))
    }
}

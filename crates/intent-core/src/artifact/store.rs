use async_trait::async_trait;

use super::ArtifactError;
use crate::model::{Artifact, ArtifactId, LifecycleState};

/// Almacenamiento de artifacts y su lineage.
///
/// `register` y `transition` son los únicos puntos de mutación; toda
/// serialización de escritores concurrentes ocurre dentro de ellos.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Registra un artifact nuevo en estado PENDING. Falla con `Cycle` si algún
    /// padre alcanza (siguiendo sus propios padres) el id nuevo; en ese caso el
    /// store queda intacto.
    async fn register(&self, artifact: Artifact) -> Result<(), ArtifactError>;

    async fn get(&self, id: &ArtifactId) -> Result<Artifact, ArtifactError>;

    /// Sólo `PENDING -> READY | FAILED`. Devuelve el artifact actualizado.
    async fn transition(&self, id: &ArtifactId, to: LifecycleState) -> Result<Artifact, ArtifactError>;

    /// Ancestros registrados (transitivos), en orden BFS desde el artifact.
    async fn ancestors(&self, id: &ArtifactId) -> Result<Vec<Artifact>, ArtifactError>;

    /// Descendientes registrados (transitivos), en orden BFS.
    async fn descendants(&self, id: &ArtifactId) -> Result<Vec<Artifact>, ArtifactError>;

    /// Artifacts producidos por una ejecución, en orden de registro.
    async fn list_by_execution(&self, execution_id: &str) -> Result<Vec<Artifact>, ArtifactError>;
}

/// Validaciones comunes a todos los backends antes de tocar el grafo.
pub fn check_registrable(artifact: &Artifact) -> Result<(), ArtifactError> {
    if artifact.lifecycle_state != LifecycleState::Pending {
        return Err(ArtifactError::NotPending { id: artifact.id.clone(),
                                               state: artifact.lifecycle_state });
    }
    if artifact.parent_artifact_ids.contains(&artifact.id) {
        return Err(ArtifactError::Cycle { id: artifact.id.clone(),
                                          via: artifact.id.clone() });
    }
    Ok(())
}

//! Artifact con lineage tipado.
//!
//! El store es dueño exclusivo de los cuerpos; el resto del runtime (runs de
//! journey, WAL) sólo guarda `ArtifactId`. Las relaciones padre se guardan como
//! ids, nunca como punteros.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Estado de ciclo de vida. Transiciones legales: `Pending -> Ready` y
/// `Pending -> Failed`; los estados terminales son inmutables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Pending,
    Ready,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LifecycleState::Pending)
    }

    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        matches!((self, to),
                 (LifecycleState::Pending, LifecycleState::Ready) | (LifecycleState::Pending, LifecycleState::Failed))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Pending => "PENDING",
            LifecycleState::Ready => "READY",
            LifecycleState::Failed => "FAILED",
        }
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(LifecycleState::Pending),
            "READY" => Ok(LifecycleState::Ready),
            "FAILED" => Ok(LifecycleState::Failed),
            other => Err(format!("unknown lifecycle state '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedBy {
    pub intent_type: String,
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub artifact_type: String,
    pub tenant_id: String,
    pub lifecycle_state: LifecycleState,
    pub produced_by: ProducedBy,
    pub parent_artifact_ids: BTreeSet<ArtifactId>,
    pub semantic_payload: Value, // opaco para el runtime
    pub created_at: DateTime<Utc>,
}

/// Artifact tal como lo entrega un handler, antes de que el runtime le asigne
/// estado, productor y timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDraft {
    pub id: Option<ArtifactId>,
    pub artifact_type: String,
    pub parent_artifact_ids: BTreeSet<ArtifactId>,
    pub semantic_payload: Value,
}

impl ArtifactDraft {
    pub fn new(artifact_type: impl Into<String>, semantic_payload: Value) -> Self {
        Self { id: None,
               artifact_type: artifact_type.into(),
               parent_artifact_ids: BTreeSet::new(),
               semantic_payload }
    }

    pub fn with_id(mut self, id: impl Into<ArtifactId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parents<I, T>(mut self, parents: I) -> Self
        where I: IntoIterator<Item = T>,
              T: Into<ArtifactId>
    {
        self.parent_artifact_ids.extend(parents.into_iter().map(Into::into));
        self
    }
}

impl From<String> for ArtifactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_can_transition() {
        assert!(LifecycleState::Pending.can_transition_to(LifecycleState::Ready));
        assert!(LifecycleState::Pending.can_transition_to(LifecycleState::Failed));
        assert!(!LifecycleState::Ready.can_transition_to(LifecycleState::Failed));
        assert!(!LifecycleState::Failed.can_transition_to(LifecycleState::Ready));
        assert!(!LifecycleState::Pending.can_transition_to(LifecycleState::Pending));
    }

    #[test]
    fn lifecycle_state_round_trips_through_str() {
        for s in [LifecycleState::Pending, LifecycleState::Ready, LifecycleState::Failed] {
            assert_eq!(s.as_str().parse::<LifecycleState>().unwrap(), s);
        }
    }
}

//! Store en memoria con arena + índice.
//!
//! Los artifacts viven en un `Vec` (arena) y se referencian por posición a
//! través de `index`. Las aristas de lineage son ids; `children` es el índice
//! inverso e incluye padres todavía no registrados (raíces externas), de modo
//! que un ciclo que pase por ellos también se detecta.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;

use super::store::check_registrable;
use super::{ArtifactError, ArtifactStore};
use crate::model::{Artifact, ArtifactId, LifecycleState};

#[derive(Default)]
struct Arena {
    items: Vec<Artifact>,
    index: HashMap<ArtifactId, usize>,
    children: HashMap<ArtifactId, Vec<ArtifactId>>,
}

impl Arena {
    fn get(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    /// `true` si `target` es `start` o uno de sus ancestros.
    fn reaches(&self, start: &ArtifactId, target: &ArtifactId) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(cur) = queue.pop_front() {
            if &cur == target {
                return true;
            }
            if !seen.insert(cur.clone()) {
                continue;
            }
            if let Some(a) = self.get(&cur) {
                queue.extend(a.parent_artifact_ids.iter().cloned());
            }
        }
        false
    }

    fn walk<F>(&self, from: &ArtifactId, next: F) -> Vec<Artifact>
        where F: Fn(&ArtifactId) -> Vec<ArtifactId>
    {
        let mut seen = HashSet::from([from.clone()]);
        let mut queue: VecDeque<ArtifactId> = next(from).into();
        let mut out = Vec::new();
        while let Some(cur) = queue.pop_front() {
            if !seen.insert(cur.clone()) {
                continue;
            }
            if let Some(a) = self.get(&cur) {
                out.push(a.clone());
            }
            queue.extend(next(&cur));
        }
        out
    }
}

#[derive(Default)]
pub struct InMemoryArtifactStore {
    inner: RwLock<Arena>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Arena> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Arena> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn register(&self, artifact: Artifact) -> Result<(), ArtifactError> {
        check_registrable(&artifact)?;
        let mut arena = self.write();
        if arena.index.contains_key(&artifact.id) {
            return Err(ArtifactError::Duplicate(artifact.id));
        }
        for parent in &artifact.parent_artifact_ids {
            if arena.reaches(parent, &artifact.id) {
                return Err(ArtifactError::Cycle { id: artifact.id.clone(),
                                                  via: parent.clone() });
            }
        }
        for parent in &artifact.parent_artifact_ids {
            arena.children.entry(parent.clone()).or_default().push(artifact.id.clone());
        }
        let pos = arena.items.len();
        arena.index.insert(artifact.id.clone(), pos);
        log::debug!("artifact registered id={} type={} parents={}",
                    artifact.id,
                    artifact.artifact_type,
                    artifact.parent_artifact_ids.len());
        arena.items.push(artifact);
        Ok(())
    }

    async fn get(&self, id: &ArtifactId) -> Result<Artifact, ArtifactError> {
        self.read().get(id).cloned().ok_or_else(|| ArtifactError::NotFound(id.clone()))
    }

    async fn transition(&self, id: &ArtifactId, to: LifecycleState) -> Result<Artifact, ArtifactError> {
        let mut arena = self.write();
        let pos = *arena.index.get(id).ok_or_else(|| ArtifactError::NotFound(id.clone()))?;
        let current = &mut arena.items[pos];
        if !current.lifecycle_state.can_transition_to(to) {
            return Err(ArtifactError::InvalidTransition { id: id.clone(),
                                                          from: current.lifecycle_state,
                                                          to });
        }
        current.lifecycle_state = to;
        Ok(current.clone())
    }

    async fn ancestors(&self, id: &ArtifactId) -> Result<Vec<Artifact>, ArtifactError> {
        let arena = self.read();
        if arena.get(id).is_none() {
            return Err(ArtifactError::NotFound(id.clone()));
        }
        Ok(arena.walk(id, |cur| {
                    arena.get(cur)
                         .map(|a| a.parent_artifact_ids.iter().cloned().collect())
                         .unwrap_or_default()
                }))
    }

    async fn descendants(&self, id: &ArtifactId) -> Result<Vec<Artifact>, ArtifactError> {
        let arena = self.read();
        if arena.get(id).is_none() {
            return Err(ArtifactError::NotFound(id.clone()));
        }
        Ok(arena.walk(id, |cur| arena.children.get(cur).cloned().unwrap_or_default()))
    }

    async fn list_by_execution(&self, execution_id: &str) -> Result<Vec<Artifact>, ArtifactError> {
        Ok(self.read()
               .items
               .iter()
               .filter(|a| a.produced_by.execution_id == execution_id)
               .cloned()
               .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProducedBy;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn art(id: &str, parents: &[&str]) -> Artifact {
        Artifact { id: id.into(),
                   artifact_type: "doc".into(),
                   tenant_id: "t1".into(),
                   lifecycle_state: LifecycleState::Pending,
                   produced_by: ProducedBy { intent_type: "parse".into(),
                                             execution_id: "e1".into() },
                   parent_artifact_ids: parents.iter().map(|p| ArtifactId::from(*p)).collect::<BTreeSet<_>>(),
                   semantic_payload: json!({"k": id}),
                   created_at: Utc::now() }
    }

    #[tokio::test]
    async fn lineage_queries_follow_parent_edges() {
        let store = InMemoryArtifactStore::new();
        store.register(art("a", &[])).await.unwrap();
        store.register(art("b", &["a"])).await.unwrap();
        store.register(art("c", &["b", "a"])).await.unwrap();

        let anc: Vec<_> = store.ancestors(&"c".into()).await.unwrap().into_iter().map(|a| a.id.0).collect();
        assert_eq!(anc.len(), 2);
        assert!(anc.contains(&"a".to_string()) && anc.contains(&"b".to_string()));

        let desc: Vec<_> = store.descendants(&"a".into()).await.unwrap().into_iter().map(|a| a.id.0).collect();
        assert_eq!(desc.len(), 2);
        assert!(store.descendants(&"c".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cycle_through_dangling_parent_is_rejected_and_store_unchanged() {
        let store = InMemoryArtifactStore::new();
        // "x" todavía no existe: raíz externa permitida
        store.register(art("a", &["x"])).await.unwrap();
        store.register(art("b", &["a"])).await.unwrap();

        let err = store.register(art("x", &["b"])).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Cycle { .. }));
        assert_eq!(store.len(), 2);
        assert!(matches!(store.get(&"x".into()).await, Err(ArtifactError::NotFound(_))));
        // el índice inverso no quedó contaminado
        assert!(store.descendants(&"b".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn self_parent_and_duplicates_are_rejected() {
        let store = InMemoryArtifactStore::new();
        assert!(matches!(store.register(art("a", &["a"])).await, Err(ArtifactError::Cycle { .. })));
        store.register(art("a", &[])).await.unwrap();
        assert!(matches!(store.register(art("a", &[])).await, Err(ArtifactError::Duplicate(_))));
    }

    #[tokio::test]
    async fn terminal_artifacts_are_immutable() {
        let store = InMemoryArtifactStore::new();
        store.register(art("a", &[])).await.unwrap();
        let ready = store.transition(&"a".into(), LifecycleState::Ready).await.unwrap();
        assert_eq!(ready.lifecycle_state, LifecycleState::Ready);
        let err = store.transition(&"a".into(), LifecycleState::Failed).await.unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidTransition { from: LifecycleState::Ready, .. }));
        assert!(matches!(store.transition(&"zz".into(), LifecycleState::Ready).await,
                         Err(ArtifactError::NotFound(_))));
    }

    #[tokio::test]
    async fn registration_requires_pending_state() {
        let store = InMemoryArtifactStore::new();
        let mut a = art("a", &[]);
        a.lifecycle_state = LifecycleState::Ready;
        assert!(matches!(store.register(a).await, Err(ArtifactError::NotPending { .. })));
    }
}

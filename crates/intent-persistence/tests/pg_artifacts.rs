mod test_support;

use std::collections::BTreeSet;

use chrono::Utc;
use intent_core::artifact::{ArtifactError, ArtifactStore};
use intent_core::model::ProducedBy;
use intent_core::{Artifact, ArtifactId, InMemoryArtifactStore, LifecycleState};
use intent_persistence::pg::PgArtifactStore;
use serde_json::json;
use test_support::{provider, unique};

fn artifact(id: &str, parents: &[&str], exec: &str) -> Artifact {
    Artifact { id: ArtifactId::from(id),
               artifact_type: "Doc".into(),
               tenant_id: "t1".into(),
               lifecycle_state: LifecycleState::Pending,
               produced_by: ProducedBy { intent_type: "make_doc".into(),
                                         execution_id: exec.into() },
               parent_artifact_ids: parents.iter().map(|p| ArtifactId::from(*p)).collect::<BTreeSet<_>>(),
               semantic_payload: json!({"id": id}),
               created_at: Utc::now() }
}

fn ids(list: &[Artifact]) -> Vec<String> {
    list.iter().map(|a| a.id.as_str().to_string()).collect()
}

#[tokio::test]
async fn register_get_and_transition() {
    let Some(p) = provider("register_get_and_transition") else { return };
    let store = PgArtifactStore::new(p);
    let exec = unique("exec");
    let a = unique("a");
    store.register(artifact(&a, &[], &exec)).await.unwrap();

    let got = store.get(&ArtifactId::from(a.as_str())).await.unwrap();
    assert_eq!(got.lifecycle_state, LifecycleState::Pending);
    assert_eq!(got.semantic_payload, json!({"id": a}));

    let ready = store.transition(&got.id, LifecycleState::Ready).await.unwrap();
    assert_eq!(ready.lifecycle_state, LifecycleState::Ready);
    let err = store.transition(&got.id, LifecycleState::Failed).await.unwrap_err();
    assert!(matches!(err, ArtifactError::InvalidTransition { .. }));

    let dup = store.register(artifact(&a, &[], &exec)).await.unwrap_err();
    assert!(matches!(dup, ArtifactError::Duplicate(_)));
    let missing = store.get(&ArtifactId::from(unique("nope"))).await.unwrap_err();
    assert!(matches!(missing, ArtifactError::NotFound(_)));
}

#[tokio::test]
async fn lineage_walks_match_in_memory_store() {
    let Some(p) = provider("lineage_walks_match_in_memory_store") else { return };
    let pg = PgArtifactStore::new(p);
    let mem = InMemoryArtifactStore::new();
    let exec = unique("exec");
    let (r, a, b, c) = (unique("r"), unique("a"), unique("b"), unique("c"));
    // r -> a, r -> b, (a, b) -> c
    let graph = vec![artifact(&r, &[], &exec),
                     artifact(&a, &[&r], &exec),
                     artifact(&b, &[&r], &exec),
                     artifact(&c, &[&a, &b], &exec)];
    for art in graph {
        pg.register(art.clone()).await.unwrap();
        mem.register(art).await.unwrap();
    }
    let c_id = ArtifactId::from(c.as_str());
    let r_id = ArtifactId::from(r.as_str());
    assert_eq!(ids(&pg.ancestors(&c_id).await.unwrap()), ids(&mem.ancestors(&c_id).await.unwrap()));
    assert_eq!(ids(&pg.descendants(&r_id).await.unwrap()), ids(&mem.descendants(&r_id).await.unwrap()));
    assert_eq!(ids(&pg.list_by_execution(&exec).await.unwrap()), vec![r, a, b, c]);
}

#[tokio::test]
async fn cycle_through_unregistered_parent_is_rejected() {
    let Some(p) = provider("cycle_through_unregistered_parent_is_rejected") else { return };
    let store = PgArtifactStore::new(p);
    let exec = unique("exec");
    let (x, y) = (unique("x"), unique("y"));
    // x declara como padre a y, que todavía no existe.
    store.register(artifact(&x, &[&y], &exec)).await.unwrap();
    let err = store.register(artifact(&y, &[&x], &exec)).await.unwrap_err();
    match err {
        ArtifactError::Cycle { id, via } => {
            assert_eq!(id.as_str(), y);
            assert_eq!(via.as_str(), x);
        }
        other => panic!("unexpected {other:?}"),
    }
    // Nada quedó escrito para y.
    assert!(matches!(store.get(&ArtifactId::from(y.as_str())).await, Err(ArtifactError::NotFound(_))));
}

#[tokio::test]
async fn non_pending_registration_is_rejected_before_io() {
    let Some(p) = provider("non_pending_registration_is_rejected_before_io") else { return };
    let store = PgArtifactStore::new(p);
    let mut art = artifact(&unique("ready"), &[], "e");
    art.lifecycle_state = LifecycleState::Ready;
    assert!(matches!(store.register(art).await, Err(ArtifactError::NotPending { .. })));
}

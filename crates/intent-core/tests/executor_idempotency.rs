mod support;

use std::sync::Arc;
use std::time::Duration;

use intent_core::constants::event_types;
use intent_core::ledger::LedgerEntry;
use intent_core::{ArtifactDraft, ArtifactId, ArtifactStore, ClaimOutcome, ClaimToken, IdempotencyLedger, ExecutionContext, FnHandler, Fingerprint,
                  HandlerContext, HandlerOutput, HandlerRegistry, InMemoryPublisher, Intent, IntentError,
                  IntentExecutor, LifecycleState, ManualClock, Params, RuntimeConfig, RuntimeStores, SystemClock};
use serde_json::json;
use support::{params, Calls, Failing, Producer};

const MATCH: &str = "match_source_to_target";

fn match_params() -> Params {
    params(json!({"source_embedding": "e1", "target_embedding": "e2"}))
}

fn intent(p: Params) -> Intent {
    Intent::new(MATCH, p, ExecutionContext::root("t1", "s1"))
}

fn setup(registry: HandlerRegistry, stores: &RuntimeStores, config: RuntimeConfig) -> IntentExecutor {
    IntentExecutor::new(Arc::new(registry), stores, config).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_invoke_handler_once() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.register(MATCH,
                      Producer::new(calls.clone(), "match_result").slow(Duration::from_millis(150))
                                                                  .requiring(&["source_embedding", "target_embedding"]))
            .unwrap();
    let publisher = Arc::new(InMemoryPublisher::default());
    let stores = RuntimeStores::in_memory(Arc::new(SystemClock)).with_publisher(publisher.clone());
    let executor = setup(registry, &stores, RuntimeConfig::default());

    let first = intent(match_params());
    let second = intent(match_params());
    assert_ne!(first.context.execution_id, second.context.execution_id);

    let ids = [first.context.execution_id.clone(), second.context.execution_id.clone()];

    let (a, b) = tokio::join!(executor.execute(first), executor.execute(second));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(calls.get(), 1);
    assert_eq!(a, b);
    assert!(ids.contains(&a.execution_id));
    assert_eq!(a.artifacts.len(), 1);
    assert_eq!(a.artifacts[0].lifecycle_state, LifecycleState::Ready);

    // sólo el líder publica
    let completed = publisher.events_for(&a.execution_id)
                             .into_iter()
                             .filter(|e| e.event_type == event_types::INTENT_COMPLETED)
                             .count();
    assert_eq!(completed, 1);
    assert!(publisher.events_for(&a.execution_id).iter().any(|e| e.event_type == "demo.produced"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_sharing_a_context_invoke_handler_once() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.register(MATCH, Producer::new(calls.clone(), "match_result").slow(Duration::from_millis(150)))
            .unwrap();
    let stores = RuntimeStores::in_memory(Arc::new(SystemClock));
    let executor = setup(registry, &stores, RuntimeConfig::default());

    // mismo execution_id en ambas llamadas, como dos recuperaciones del mismo step
    let req = intent(match_params());
    let (a, b) = tokio::join!(executor.execute(req.clone()), executor.execute(req.clone()));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(calls.get(), 1);
    assert_eq!(a, b);
    assert_eq!(a.execution_id, req.context.execution_id);
    assert_eq!(stores.artifacts.list_by_execution(&req.context.execution_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn completed_fingerprint_is_served_from_ledger() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.register(MATCH, Producer::new(calls.clone(), "match_result")).unwrap();
    let stores = RuntimeStores::in_memory(Arc::new(SystemClock));
    let executor = setup(registry, &stores, RuntimeConfig::default());

    let first = executor.execute(intent(match_params())).await.unwrap();
    // mismo contenido, claves en otro orden y número con otra representación
    let reordered = params(json!({"target_embedding": "e2", "source_embedding": "e1"}));
    let second = executor.execute(intent(reordered)).await.unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(first, second);

    // otro tenant no comparte resultado
    let other = Intent::new(MATCH, match_params(), ExecutionContext::root("t2", "s1"));
    executor.execute(other).await.unwrap();
    assert_eq!(calls.get(), 2);
}

#[tokio::test]
async fn validation_errors_never_touch_the_ledger() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.register(MATCH,
                      Producer::new(calls.clone(), "match_result").requiring(&["source_embedding", "target_embedding"]))
            .unwrap();
    let stores = RuntimeStores::in_memory(Arc::new(SystemClock));
    let executor = setup(registry, &stores, RuntimeConfig::default());

    let bad = intent(params(json!({"source_embedding": "e1"})));
    let fp = Fingerprint::of(&bad);
    let err = executor.execute(bad).await.unwrap_err();
    assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
    assert!(stores.ledger.lookup(&fp).await.unwrap().is_none());
    assert_eq!(calls.get(), 0);

    let err = executor.execute(Intent::new("unknown_intent", Params::new(), ExecutionContext::root("t1", "s1")))
                      .await
                      .unwrap_err();
    assert!(matches!(err, IntentError::NotFound(_)));

    let err = executor.execute(Intent::new(MATCH, match_params(), ExecutionContext::root("", "s1")))
                      .await
                      .unwrap_err();
    assert!(matches!(err, IntentError::Validation(_)));

    let bad_inputs = intent(params(json!({"source_embedding": "e1", "target_embedding": "e2", "inputs": [1]})));
    assert!(matches!(executor.execute(bad_inputs).await, Err(IntentError::Validation(_))));

    executor.execute(intent(match_params())).await.unwrap();
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn handler_failure_fails_partial_artifacts_and_releases_claim() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.register("parse_document",
                      Failing { calls: calls.clone(),
                                permanent: false })
            .unwrap();
    let publisher = Arc::new(InMemoryPublisher::default());
    let stores = RuntimeStores::in_memory(Arc::new(SystemClock)).with_publisher(publisher.clone());
    let executor = setup(registry, &stores, RuntimeConfig::default());

    let req = Intent::new("parse_document", params(json!({"doc": "d1"})), ExecutionContext::root("t1", "s1"));
    let exec_id = req.context.execution_id.clone();
    let fp = Fingerprint::of(&req);
    let err = executor.execute(req.clone()).await.unwrap_err();
    match &err {
        IntentError::Runtime { execution_id,
                               cause,
                               permanent, } => {
            assert_eq!(execution_id, &exec_id);
            assert_eq!(cause, "upstream unavailable");
            assert!(!permanent);
        }
        other => panic!("unexpected {other:?}"),
    }

    let partial = stores.artifacts.list_by_execution(&exec_id).await.unwrap();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].lifecycle_state, LifecycleState::Failed);
    assert!(stores.ledger.lookup(&fp).await.unwrap().is_none());
    assert!(publisher.events_for(&exec_id).iter().any(|e| e.event_type == event_types::INTENT_FAILED));

    // el claim fue liberado: un reintento vuelve a invocar
    let _ = executor.execute(req).await;
    assert_eq!(calls.get(), 2);
}

#[tokio::test]
async fn timeout_is_a_failure_and_late_staging_is_rejected() {
    let staged_late = Arc::new(tokio::sync::Mutex::new(None));
    let seen = staged_late.clone();
    let mut registry = HandlerRegistry::new();
    registry.register("slow_synthesis",
                      FnHandler::new(&[], move |_p: Params, ctx: HandlerContext| {
                          let seen = seen.clone();
                          async move {
                              tokio::time::sleep(Duration::from_millis(200)).await;
                              let res = ctx.stage_artifact(ArtifactDraft::new("late", json!({}))).await;
                              *seen.lock().await = Some(res.is_err());
                              Ok(HandlerOutput::new())
                          }
                      }))
            .unwrap();
    let stores = RuntimeStores::in_memory(Arc::new(SystemClock));
    let config = RuntimeConfig::default().with_handler_timeout(Duration::from_millis(50))
                                         .with_lease_ttl(Duration::from_secs(5));
    let executor = setup(registry, &stores, config);

    let req = Intent::new("slow_synthesis", Params::new(), ExecutionContext::root("t1", "s1"));
    let fp = Fingerprint::of(&req);
    let err = executor.execute(req).await.unwrap_err();
    assert!(matches!(err, IntentError::Timeout { after_ms: 50, .. }));
    assert_eq!(err.code().as_str(), "TIMEOUT");
    assert!(stores.ledger.lookup(&fp).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*staged_late.lock().await, Some(true));
}

#[tokio::test]
async fn expired_lease_is_reclaimed_and_abandoned_completion_cannot_overwrite() {
    let clock = Arc::new(ManualClock::default());
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.register(MATCH, Producer::new(calls.clone(), "match_result")).unwrap();
    let stores = RuntimeStores::in_memory(clock.clone());
    let config = RuntimeConfig::default().with_lease_ttl(Duration::from_secs(60));
    let executor = setup(registry, &stores, config);

    let req = intent(match_params());
    let fp = Fingerprint::of(&req);
    // un proceso que murió a mitad de handler
    let ghost_owner = ClaimToken::new("ghost-exec");
    let ghost = stores.ledger.try_claim(&fp, &ghost_owner, Duration::from_secs(60)).await.unwrap();
    assert!(matches!(ghost, ClaimOutcome::Claimed { .. }));
    clock.advance(chrono::Duration::seconds(61));

    let outcome = executor.execute(req.clone()).await.unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(outcome.execution_id, req.context.execution_id);

    let late = intent_core::Outcome { execution_id: "ghost-exec".into(),
                                      artifacts: vec![],
                                      events: vec![] };
    assert!(stores.ledger.complete(&fp, &ghost_owner, &late).await.is_err());
    match stores.ledger.lookup(&fp).await.unwrap() {
        Some(LedgerEntry::Done(record)) => assert_eq!(record.outcome, outcome),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn artifacts_inherit_inputs_as_parents_and_cycles_are_conflicts() {
    let mut registry = HandlerRegistry::new();
    registry.register("embed_document",
                      FnHandler::new(&[], |_p: Params, _ctx: HandlerContext| async {
                          Ok(HandlerOutput::new().with_artifact(ArtifactDraft::new("embedding", json!({"dims": 3}))))
                      }))
            .unwrap();
    registry.register("self_referencing",
                      FnHandler::new(&[], |_p: Params, _ctx: HandlerContext| async {
                          Ok(HandlerOutput::new().with_artifact(ArtifactDraft::new("loop", json!({})).with_id("loop-1")
                                                                                                    .with_parents(["loop-1"])))
                      }))
            .unwrap();
    let stores = RuntimeStores::in_memory(Arc::new(SystemClock));
    let executor = setup(registry, &stores, RuntimeConfig::default());

    let with_inputs = Intent::new("embed_document",
                                  params(json!({"inputs": {"parse": ["doc-1", "doc-2"]}})),
                                  ExecutionContext::root("t1", "s1"));
    let outcome = executor.execute(with_inputs).await.unwrap();
    let parents: Vec<ArtifactId> = outcome.artifacts[0].parent_artifact_ids.iter().cloned().collect();
    assert_eq!(parents, vec![ArtifactId::from("doc-1"), ArtifactId::from("doc-2")]);

    let req = Intent::new("self_referencing", Params::new(), ExecutionContext::root("t1", "s1"));
    let fp = Fingerprint::of(&req);
    let err = executor.execute(req).await.unwrap_err();
    assert_eq!(err.code().as_str(), "CONFLICT");
    assert!(stores.artifacts.get(&ArtifactId::from("loop-1")).await.is_err());
    assert!(stores.ledger.lookup(&fp).await.unwrap().is_none());
}

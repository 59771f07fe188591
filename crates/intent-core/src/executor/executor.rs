//! Intent executor.
//!
//! Orden de una ejecución:
//! 1. Validación (tipo, contexto, params, inputs). Nada de estado todavía.
//! 2. Fingerprint y claim en el ledger: `AlreadyDone` devuelve el outcome
//!    guardado; `AlreadyInFlight` espera al dueño (canal local si corre en
//!    este proceso, sondeo del ledger si no).
//! 3. Con el claim: handler en su propia task con timeout, renovando el lease
//!    cada `lease_ttl / 3`.
//! 4. Éxito: artifacts PENDING, `complete` en el ledger, READY, eventos.
//!    Fallo: artifacts creados a FAILED, `release`, `intent.failed`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::ArtifactStager;
use crate::artifact::ArtifactStore;
use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::constants::{event_types, INPUTS_PARAM};
use crate::errors::IntentError;
use crate::events::{DomainEvent, EventPublisher};
use crate::ledger::{ClaimOutcome, ClaimToken, IdempotencyLedger, LedgerError};
use crate::model::{Artifact, ArtifactId, Fingerprint, Intent, LifecycleState, Outcome, Params, ProducedBy};
use crate::registry::{HandlerContext, HandlerError, HandlerOutput, HandlerRegistry, IntentHandler};
use crate::stores::RuntimeStores;

type SharedResult = Option<Result<Outcome, IntentError>>;

struct ExecutorInner {
    registry: Arc<HandlerRegistry>,
    ledger: Arc<dyn IdempotencyLedger>,
    artifacts: Arc<dyn ArtifactStore>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
    /// Ejecuciones líderes de este proceso, para que los duplicados se unan
    /// sin sondear el ledger.
    inflight: DashMap<Fingerprint, watch::Receiver<SharedResult>>,
}

/// Ejecuta intents individuales. Barato de clonar.
#[derive(Clone)]
pub struct IntentExecutor {
    inner: Arc<ExecutorInner>,
}

/// Intent validado, listo para reclamar.
struct Prepared {
    intent: Intent,
    fingerprint: Fingerprint,
    handler: Arc<dyn IntentHandler>,
    inputs: BTreeMap<String, Vec<ArtifactId>>,
}

enum Invocation {
    Finished(Result<HandlerOutput, HandlerError>),
    Panicked(String),
    TimedOut,
}

impl IntentExecutor {
    pub fn new(registry: Arc<HandlerRegistry>, stores: &RuntimeStores, config: RuntimeConfig) -> Result<Self, IntentError> {
        config.validate()?;
        Ok(Self { inner: Arc::new(ExecutorInner { registry,
                                                  ledger: stores.ledger.clone(),
                                                  artifacts: stores.artifacts.clone(),
                                                  publisher: stores.publisher.clone(),
                                                  clock: stores.clock.clone(),
                                                  config,
                                                  inflight: DashMap::new() }) })
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn artifacts(&self) -> Arc<dyn ArtifactStore> {
        self.inner.artifacts.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Valida el intent sin tocar ledger ni stores.
    pub fn validate(&self, intent: &Intent) -> Result<(), IntentError> {
        self.inner.prepare(intent.clone()).map(|_| ())
    }

    /// Ejecuta (o recupera el resultado de) un intent.
    pub async fn execute(&self, intent: Intent) -> Result<Outcome, IntentError> {
        let prepared = self.inner.prepare(intent)?;
        // cada llamada es un dueño distinto, aun con el mismo contexto
        let owner = ClaimToken::new(prepared.intent.context.execution_id.clone());
        let ttl = self.inner.config.lease_ttl;
        loop {
            match self.inner.ledger.try_claim(&prepared.fingerprint, &owner, ttl).await? {
                ClaimOutcome::AlreadyDone(record) => {
                    log::debug!("intent {} fp={} served from ledger (original exec={})",
                                prepared.intent.intent_type,
                                prepared.fingerprint,
                                record.execution_id);
                    return Ok(record.outcome);
                }
                ClaimOutcome::AlreadyInFlight { execution_id: holder, .. } => {
                    log::debug!("intent fp={} in flight under {}, joining", prepared.fingerprint, holder);
                    if let Some(result) = self.join_local(&prepared.fingerprint).await {
                        return result;
                    }
                    tokio::time::sleep(self.inner.config.join_poll_interval).await;
                }
                ClaimOutcome::Claimed { .. } => return self.lead(prepared, owner).await,
            }
        }
    }

    /// Espera al líder local, si lo hay. `None` si no hay líder en este
    /// proceso o si desapareció sin publicar resultado.
    async fn join_local(&self, fingerprint: &Fingerprint) -> Option<Result<Outcome, IntentError>> {
        let mut rx = self.inner.inflight.get(fingerprint).map(|r| r.value().clone())?;
        let guard = rx.wait_for(Option::is_some).await.ok()?;
        guard.clone()
    }

    /// Corre como dueño del claim. El trabajo vive en su propia task: si el
    /// llamador abandona el future, los que se unieron igual reciben
    /// resultado.
    async fn lead(&self, prepared: Prepared, owner: ClaimToken) -> Result<Outcome, IntentError> {
        let fingerprint = prepared.fingerprint.clone();
        let execution_id = prepared.intent.context.execution_id.clone();
        let (tx, rx) = watch::channel(None);
        self.inner.inflight.insert(fingerprint.clone(), rx.clone());

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = inner.run_claimed(prepared, &owner).await;
            let _ = tx.send(Some(result.clone()));
            inner.inflight.remove_if(&fingerprint, |_, r| r.same_channel(&rx));
            result
        });
        task.await.map_err(|e| IntentError::Runtime { execution_id,
                                                      cause: format!("executor task failed: {e}"),
                                                      permanent: false })?
    }
}

fn parse_inputs(params: &Params) -> Result<BTreeMap<String, Vec<ArtifactId>>, IntentError> {
    let Some(raw) = params.get(INPUTS_PARAM) else {
        return Ok(BTreeMap::new());
    };
    let Value::Object(map) = raw else {
        return Err(IntentError::Validation(format!("'{INPUTS_PARAM}' must be an object of artifact id lists")));
    };
    let mut out = BTreeMap::new();
    for (dep, ids) in map {
        let ids = ids.as_array()
                     .and_then(|arr| arr.iter().map(|v| v.as_str().map(ArtifactId::from)).collect::<Option<Vec<_>>>())
                     .ok_or_else(|| IntentError::Validation(format!("'{INPUTS_PARAM}.{dep}' must be a list of artifact ids")))?;
        out.insert(dep.clone(), ids);
    }
    Ok(out)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ExecutorInner {
    fn prepare(&self, intent: Intent) -> Result<Prepared, IntentError> {
        if intent.intent_type.trim().is_empty() {
            return Err(IntentError::Validation("intent_type is required".into()));
        }
        intent.context.validate()?;
        let handler = self.registry.resolve(&intent.intent_type)?;
        handler.validate(&intent.params)
               .map_err(|msg| IntentError::Validation(format!("{}: {msg}", intent.intent_type)))?;
        let inputs = parse_inputs(&intent.params)?;
        let fingerprint = Fingerprint::of(&intent);
        Ok(Prepared { intent,
                      fingerprint,
                      handler,
                      inputs })
    }

    async fn run_claimed(&self, prepared: Prepared, owner: &ClaimToken) -> Result<Outcome, IntentError> {
        let Prepared { intent,
                       fingerprint,
                       handler,
                       inputs, } = prepared;
        let ctx = intent.context.clone();
        let default_parents: BTreeSet<ArtifactId> = inputs.values().flatten().cloned().collect();
        let stager = Arc::new(ArtifactStager::new(self.artifacts.clone(),
                                                  self.clock.clone(),
                                                  ctx.tenant_id.clone(),
                                                  ProducedBy { intent_type: intent.intent_type.clone(),
                                                               execution_id: ctx.execution_id.clone() },
                                                  default_parents));
        let hctx = HandlerContext::new(ctx.clone(), intent.intent_type.clone(), inputs, stager.clone());

        log::debug!("invoking handler {} exec={}", intent.intent_type, ctx.execution_id);
        let invocation = self.invoke(&fingerprint, owner, handler, intent.params.clone(), hctx).await;

        let failure = match invocation {
            Invocation::Finished(Ok(output)) => return self.finish_success(&intent, &fingerprint, owner, &stager, output).await,
            Invocation::Finished(Err(HandlerError::Failed(cause))) => {
                IntentError::Runtime { execution_id: ctx.execution_id.clone(),
                                       cause,
                                       permanent: false }
            }
            Invocation::Finished(Err(HandlerError::Permanent(cause))) => {
                IntentError::Runtime { execution_id: ctx.execution_id.clone(),
                                       cause,
                                       permanent: true }
            }
            Invocation::Panicked(cause) => IntentError::Runtime { execution_id: ctx.execution_id.clone(),
                                                                  cause,
                                                                  permanent: false },
            Invocation::TimedOut => {
                log::warn!("handler {} exec={} timed out after {:?}",
                           intent.intent_type,
                           ctx.execution_id,
                           self.config.handler_timeout);
                IntentError::Timeout { execution_id: ctx.execution_id.clone(),
                                       after_ms: duration_ms(self.config.handler_timeout) }
            }
        };
        Err(self.fail_claimed(&intent, &fingerprint, owner, &stager, failure).await)
    }

    /// Corre el handler con timeout y renovación de lease. En timeout la task
    /// sigue sola y su resultado se descarta.
    async fn invoke(&self,
                    fingerprint: &Fingerprint,
                    owner: &ClaimToken,
                    handler: Arc<dyn IntentHandler>,
                    params: Params,
                    hctx: HandlerContext)
                    -> Invocation {
        let mut task = tokio::spawn(async move { handler.handle(params, hctx).await });
        let deadline = tokio::time::sleep(self.config.handler_timeout);
        tokio::pin!(deadline);
        let period = (self.config.lease_ttl / 3).max(Duration::from_millis(1));
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                joined = &mut task => {
                    return match joined {
                        Ok(result) => Invocation::Finished(result),
                        Err(e) => Invocation::Panicked(format!("handler panicked: {e}")),
                    };
                }
                _ = &mut deadline => return Invocation::TimedOut,
                _ = renew.tick() => {
                    if let Err(e) = self.ledger.renew(fingerprint, owner, self.config.lease_ttl).await {
                        log::warn!("lease renewal for {} failed: {}", owner, e);
                    }
                }
            }
        }
    }

    async fn finish_success(&self,
                            intent: &Intent,
                            fingerprint: &Fingerprint,
                            owner: &ClaimToken,
                            stager: &ArtifactStager,
                            output: HandlerOutput)
                            -> Result<Outcome, IntentError> {
        let ctx = &intent.context;
        let mut ids = stager.close();
        for draft in output.artifacts {
            let artifact = stager.build(draft);
            let id = artifact.id.clone();
            if let Err(e) = self.artifacts.register(artifact).await {
                return Err(self.fail_claimed(intent, fingerprint, owner, stager, e.into()).await);
            }
            ids.push(id);
        }

        let mut artifacts: Vec<Artifact> = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.artifacts.get(id).await {
                Ok(mut a) => {
                    a.lifecycle_state = LifecycleState::Ready;
                    artifacts.push(a);
                }
                Err(e) => return Err(self.fail_with(intent, fingerprint, owner, &ids, e.into()).await),
            }
        }
        let now = self.clock.now();
        let step_name = ctx.step_name().map(str::to_string);
        let events: Vec<DomainEvent> =
            output.events
                  .into_iter()
                  .map(|d| DomainEvent::new(&ctx.execution_id, step_name.clone(), d.event_type, d.payload, now))
                  .collect();
        let outcome = Outcome { execution_id: ctx.execution_id.clone(),
                                artifacts,
                                events };

        if let Err(e) = self.ledger.complete(fingerprint, owner, &outcome).await {
            if let LedgerError::ClaimLost { .. } = e {
                log::warn!("exec={} lost its claim before completing; result discarded", ctx.execution_id);
            }
            return Err(self.fail_with(intent, fingerprint, owner, &ids, e.into()).await);
        }
        for id in &ids {
            if let Err(e) = self.artifacts.transition(id, LifecycleState::Ready).await {
                log::error!("artifact {} could not be finalized: {}", id, e);
            }
        }
        for event in &outcome.events {
            self.publisher.publish(event.clone());
        }
        self.publisher.publish(DomainEvent::new(&ctx.execution_id,
                                                step_name,
                                                event_types::INTENT_COMPLETED,
                                                json!({ "intent_type": intent.intent_type,
                                                        "artifact_ids": outcome.artifact_ids() }),
                                                self.clock.now()));
        log::debug!("intent {} exec={} completed with {} artifacts",
                    intent.intent_type,
                    ctx.execution_id,
                    outcome.artifacts.len());
        Ok(outcome)
    }

    async fn fail_claimed(&self,
                          intent: &Intent,
                          fingerprint: &Fingerprint,
                          owner: &ClaimToken,
                          stager: &ArtifactStager,
                          error: IntentError)
                          -> IntentError {
        let ids = stager.close();
        self.fail_with(intent, fingerprint, owner, &ids, error).await
    }

    /// Marca FAILED lo creado, libera el claim y publica `intent.failed`.
    async fn fail_with(&self,
                       intent: &Intent,
                       fingerprint: &Fingerprint,
                       owner: &ClaimToken,
                       ids: &[ArtifactId],
                       error: IntentError)
                       -> IntentError {
        let ctx = &intent.context;
        for id in ids {
            if let Err(e) = self.artifacts.transition(id, LifecycleState::Failed).await {
                log::warn!("artifact {} not marked failed: {}", id, e);
            }
        }
        match self.ledger.release(fingerprint, owner).await {
            Ok(_) => {}
            Err(e) => log::error!("releasing claim fp={} failed: {}", fingerprint, e),
        }
        self.publisher.publish(DomainEvent::new(&ctx.execution_id,
                                                ctx.step_name().map(str::to_string),
                                                event_types::INTENT_FAILED,
                                                json!({ "intent_type": intent.intent_type,
                                                        "error_code": error.code(),
                                                        "error": error.to_string() }),
                                                self.clock.now()));
        log::debug!("intent {} exec={} failed: {}", intent.intent_type, ctx.execution_id, error);
        error
    }
}

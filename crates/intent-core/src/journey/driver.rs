//! Driver de una ejecución de journey.
//!
//! Hay exactamente un driver por `execution_id` y es el único que agrega
//! registros al WAL para esa ejecución. Cada step corre en su propia task
//! dentro de un `JoinSet`; el driver sólo decide, persiste y publica.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::json;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::run::event_for;
use super::{JourneyDefinition, JourneyRun};
use crate::constants::INPUTS_PARAM;
use crate::errors::{classify_error, IntentError};
use crate::events::EventPublisher;
use crate::executor::IntentExecutor;
use crate::model::{ArtifactId, ExecutionContext, Intent, Outcome, Params};
use crate::wal::{JourneyStatus, NewWalRecord, StepState, WalRecord, WalStore};

type StepResult = (String, Result<Outcome, IntentError>);

/// Intent de un step: params de la journey, pisados por los del step, más
/// `inputs` con los outputs de cada dependencia.
pub(crate) fn step_intent(definition: &JourneyDefinition,
                          step: &str,
                          journey_params: &Params,
                          outputs: &BTreeMap<String, Vec<ArtifactId>>,
                          context: &ExecutionContext)
                          -> Intent {
    let mut params = journey_params.clone();
    let mut inputs = serde_json::Map::new();
    let spec = definition.step(step);
    if let Some(spec) = spec {
        params.extend(spec.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        for dep in &spec.depends_on {
            let ids = outputs.get(dep).cloned().unwrap_or_default();
            inputs.insert(dep.clone(), json!(ids));
        }
    }
    params.insert(INPUTS_PARAM.to_string(), inputs.into());
    let intent_type = spec.map(|s| s.intent_type.clone()).unwrap_or_default();
    Intent::new(intent_type, params, context.child(step))
}

pub(crate) struct JourneyDriver {
    pub(crate) definition: Arc<JourneyDefinition>,
    pub(crate) run: JourneyRun,
    pub(crate) executor: IntentExecutor,
    pub(crate) wal: Arc<dyn WalStore>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) cancel: CancellationToken,
    /// Copia visible para consultas de estado.
    pub(crate) snapshot: Arc<RwLock<JourneyRun>>,
}

impl JourneyDriver {
    pub(crate) async fn drive(mut self) -> Result<JourneyStatus, IntentError> {
        self.requeue_interrupted().await?;
        let mut tasks: JoinSet<StepResult> = JoinSet::new();
        let mut spare: Option<OwnedSemaphorePermit> = None;
        let cancel = self.cancel.clone();
        let permits = self.permits.clone();

        loop {
            if self.run.status.is_terminal() {
                // cancelada: sólo se registran los steps que ya estaban corriendo
                match tasks.join_next().await {
                    Some(joined) => self.on_step_finished(joined).await?,
                    None => return Ok(self.run.status),
                }
                continue;
            }
            self.skip_blocked().await?;
            let waiting_for_permit = self.schedule(&mut tasks, &mut spare).await?;
            if tasks.is_empty() && !waiting_for_permit {
                let status = if self.run.all_done() {
                    JourneyStatus::Completed
                } else {
                    JourneyStatus::Failed
                };
                self.finish(status).await?;
                return Ok(status);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("journey {} cancelled", self.run.execution_id);
                    self.finish(JourneyStatus::Cancelled).await?;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.on_step_finished(joined).await?;
                }
                permit = permits.clone().acquire_owned(), if waiting_for_permit => {
                    spare = permit.ok();
                }
            }
        }
    }

    /// Steps que un crash dejó en RUNNING vuelven a PENDING.
    async fn requeue_interrupted(&mut self) -> Result<(), IntentError> {
        for step in self.run.running_steps() {
            log::warn!("journey {}: step '{}' was running at shutdown; requeued", self.run.execution_id, step);
            self.record(NewWalRecord::step(&self.run.execution_id, &step, StepState::Running, StepState::Pending)
                            .with_payload(json!({ "recovered": true })))
                .await?;
        }
        Ok(())
    }

    /// Marca SKIPPED (hasta punto fijo) todo PENDING con una dependencia
    /// fallida u omitida.
    async fn skip_blocked(&mut self) -> Result<(), IntentError> {
        loop {
            let blocked = self.run.blocked_steps(&self.definition);
            if blocked.is_empty() {
                return Ok(());
            }
            for step in blocked {
                let reason = self.definition
                                 .step(&step)
                                 .and_then(|s| {
                                     s.depends_on.iter().find(|d| {
                                                            matches!(self.run.state(d),
                                                                     Some(StepState::Failed) | Some(StepState::Skipped))
                                                        })
                                 })
                                 .map(|d| format!("dependency '{d}' did not complete"))
                                 .unwrap_or_default();
                self.record(NewWalRecord::step(&self.run.execution_id, &step, StepState::Pending, StepState::Skipped)
                                .with_payload(json!({ "reason": reason })))
                    .await?;
            }
        }
    }

    /// Lanza todo step elegible para el que haya permiso. Devuelve `true` si
    /// quedó alguno esperando permiso.
    async fn schedule(&mut self,
                      tasks: &mut JoinSet<StepResult>,
                      spare: &mut Option<OwnedSemaphorePermit>)
                      -> Result<bool, IntentError> {
        for step in self.run.eligible_steps(&self.definition) {
            let permit = match spare.take() {
                Some(p) => p,
                None => match self.permits.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => return Ok(true),
                },
            };
            let intent = self.step_intent(&step);
            let attempt = self.run.attempts(&step) + 1;
            self.record(NewWalRecord::step(&self.run.execution_id, &step, StepState::Pending, StepState::Running)
                            .with_payload(json!({ "attempt": attempt,
                                                  "intent_type": intent.intent_type,
                                                  "step_execution_id": intent.context.execution_id })))
                .await?;
            let executor = self.executor.clone();
            tasks.spawn(async move {
                     let _permit = permit;
                     let result = executor.execute(intent).await;
                     (step, result)
                 });
        }
        Ok(false)
    }

    fn step_intent(&self, step: &str) -> Intent {
        step_intent(&self.definition, step, &self.run.params, &self.run.outputs, &self.run.context)
    }

    async fn on_step_finished(&mut self, joined: Result<StepResult, JoinError>) -> Result<(), IntentError> {
        let (step, result) = joined.map_err(|e| IntentError::Runtime { execution_id: self.run.execution_id.clone(),
                                                                        cause: format!("step task failed: {e}"),
                                                                        permanent: false })?;
        let exec = self.run.execution_id.clone();
        match result {
            Ok(outcome) => {
                self.record(NewWalRecord::step(&exec, &step, StepState::Running, StepState::Done)
                                .with_payload(json!({ "execution_id": outcome.execution_id,
                                                      "artifacts": outcome.artifact_ids() })))
                    .await?;
            }
            Err(err) => {
                let attempts = self.run.attempts(&step);
                let max_attempts = self.definition
                                       .step(&step)
                                       .and_then(|s| s.max_attempts)
                                       .unwrap_or(self.executor.config().default_max_attempts);
                let payload = json!({ "error": err.to_string(),
                                      "error_code": err.code(),
                                      "attempt": attempts });
                let retry = classify_error(&err).is_retryable() && attempts < max_attempts && !self.run.status.is_terminal();
                if retry {
                    log::warn!("journey {}: step '{}' failed (attempt {}/{}), retrying: {}",
                               exec,
                               step,
                               attempts,
                               max_attempts,
                               err);
                    self.record(NewWalRecord::step(&exec, &step, StepState::Running, StepState::Pending).with_payload(payload))
                        .await?;
                } else {
                    log::warn!("journey {}: step '{}' failed: {}", exec, step, err);
                    self.record(NewWalRecord::step(&exec, &step, StepState::Running, StepState::Failed).with_payload(payload))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn finish(&mut self, status: JourneyStatus) -> Result<(), IntentError> {
        let payload = json!({ "failed_steps": self.run.steps_in(StepState::Failed),
                              "skipped_steps": self.run.steps_in(StepState::Skipped),
                              "pending_steps": self.run.steps_in(StepState::Pending) });
        let exec = self.run.execution_id.clone();
        self.record(NewWalRecord::journey(&exec, Some(JourneyStatus::Running), status).with_payload(payload))
            .await?;
        log::debug!("journey {} ({}) finished {:?}", exec, self.run.journey_id, status);
        Ok(())
    }

    /// Único punto de escritura: WAL, luego estado en memoria, luego evento.
    async fn record(&mut self, record: NewWalRecord) -> Result<WalRecord, IntentError> {
        let rec = self.wal.append(record).await.map_err(|e| {
                                                    log::error!("journey {}: wal append failed: {}", self.run.execution_id, e);
                                                    IntentError::from(e)
                                                })?;
        self.run.apply(&rec)?;
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = self.run.clone();
        self.publisher.publish(event_for(&rec));
        Ok(rec)
    }
}

//! Orquestador de journeys (saga executor).
//!
//! Las definiciones se componen al arrancar (`compose_journey` con
//! `&mut self`); después el orquestador se comparte de sólo lectura. Cada
//! ejecución tiene su propio driver; el semáforo `permits` es el límite
//! global de steps corriendo a la vez.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use super::driver::{step_intent, JourneyDriver};
use super::run::event_for;
use super::{JourneyDefinition, JourneyError, JourneyRun, JourneyStart};
use crate::errors::IntentError;
use crate::events::EventPublisher;
use crate::executor::IntentExecutor;
use crate::model::{ExecutionContext, Params};
use crate::stores::RuntimeStores;
use crate::wal::{JourneyStatus, NewWalRecord, WalRecord, WalStore};

type DoneSignal = Option<Result<JourneyStatus, IntentError>>;

struct RunHandle {
    snapshot: Arc<RwLock<JourneyRun>>,
    cancel: CancellationToken,
    done: watch::Receiver<DoneSignal>,
}

impl RunHandle {
    fn snapshot(&self) -> JourneyRun {
        self.snapshot.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn is_active(&self) -> bool {
        self.done.borrow().is_none()
    }
}

/// Resultado de `recover`.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub resumed: Vec<String>,
    /// Ejecuciones abiertas que no se pudieron retomar (journey desconocida,
    /// definición cambiada, WAL ilegible).
    pub refused: Vec<(String, IntentError)>,
}

pub struct JourneyOrchestrator {
    executor: IntentExecutor,
    wal: Arc<dyn WalStore>,
    publisher: Arc<dyn EventPublisher>,
    journeys: BTreeMap<String, Arc<JourneyDefinition>>,
    permits: Arc<Semaphore>,
    runs: DashMap<String, Arc<RunHandle>>,
}

impl JourneyOrchestrator {
    pub fn new(executor: IntentExecutor, stores: &RuntimeStores) -> Self {
        let permits = Arc::new(Semaphore::new(executor.config().max_concurrency));
        Self { executor,
               wal: stores.wal.clone(),
               publisher: stores.publisher.clone(),
               journeys: BTreeMap::new(),
               permits,
               runs: DashMap::new() }
    }

    pub fn executor(&self) -> &IntentExecutor {
        &self.executor
    }

    /// Registra una definición. Todos sus intent types deben existir ya en
    /// el registry.
    pub fn compose_journey(&mut self, definition: JourneyDefinition) -> Result<(), IntentError> {
        if self.journeys.contains_key(definition.journey_id()) {
            return Err(JourneyError::DuplicateJourney(definition.journey_id().to_string()).into());
        }
        if let Some(step) = definition.steps().find(|s| !self.executor.registry().contains(&s.intent_type)) {
            return Err(JourneyError::UnknownIntentType { step: step.name.clone(),
                                                         intent_type: step.intent_type.clone() }.into());
        }
        log::debug!("composed journey '{}' ({} steps, hash {})",
                    definition.journey_id(),
                    definition.len(),
                    definition.definition_hash());
        self.journeys.insert(definition.journey_id().to_string(), Arc::new(definition));
        Ok(())
    }

    pub fn journey(&self, journey_id: &str) -> Option<&JourneyDefinition> {
        self.journeys.get(journey_id).map(Arc::as_ref)
    }

    pub fn journey_ids(&self) -> Vec<&str> {
        self.journeys.keys().map(String::as_str).collect()
    }

    fn definition(&self, journey_id: &str) -> Result<Arc<JourneyDefinition>, JourneyError> {
        self.journeys
            .get(journey_id)
            .cloned()
            .ok_or_else(|| JourneyError::UnknownJourney(journey_id.to_string()))
    }

    /// Inicia una ejecución y devuelve su `execution_id` sin esperar.
    pub async fn trigger(&self,
                         journey_id: &str,
                         params: Params,
                         tenant_id: &str,
                         session_id: &str)
                         -> Result<String, IntentError> {
        self.trigger_in(journey_id, params, ExecutionContext::root(tenant_id, session_id)).await
    }

    pub async fn trigger_in(&self,
                            journey_id: &str,
                            params: Params,
                            context: ExecutionContext)
                            -> Result<String, IntentError> {
        let definition = self.definition(journey_id)?;
        context.validate()?;
        // errores de params salen ahora, no como steps FAILED
        let no_outputs = BTreeMap::new();
        for step in definition.steps() {
            self.executor
                .validate(&step_intent(&definition, &step.name, &params, &no_outputs, &context))?;
        }
        if !self.wal.list(&context.execution_id).await?.is_empty() {
            return Err(IntentError::Conflict(format!("execution {} already exists", context.execution_id)));
        }
        let start = JourneyStart { journey_id: journey_id.to_string(),
                                   definition_hash: definition.definition_hash().to_string(),
                                   params,
                                   context };
        let rec = self.wal.append(start.record()).await?;
        self.publisher.publish(event_for(&rec));
        let run = JourneyRun::replay(&definition, std::slice::from_ref(&rec))?;
        let execution_id = run.execution_id.clone();
        log::debug!("journey '{}' triggered as {}", journey_id, execution_id);
        self.launch(definition, run);
        Ok(execution_id)
    }

    fn launch(&self, definition: Arc<JourneyDefinition>, run: JourneyRun) {
        let execution_id = run.execution_id.clone();
        let snapshot = Arc::new(RwLock::new(run.clone()));
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        self.runs.insert(execution_id.clone(),
                         Arc::new(RunHandle { snapshot: snapshot.clone(),
                                              cancel: cancel.clone(),
                                              done: rx }));
        let driver = JourneyDriver { definition,
                                     run,
                                     executor: self.executor.clone(),
                                     wal: self.wal.clone(),
                                     publisher: self.publisher.clone(),
                                     permits: self.permits.clone(),
                                     cancel,
                                     snapshot };
        tokio::spawn(async move {
            let result = driver.drive().await;
            if let Err(e) = &result {
                log::error!("journey {} stopped before reaching a terminal status: {}", execution_id, e);
            }
            let _ = tx.send(Some(result));
        });
    }

    /// Espera a que el driver de la ejecución termine y devuelve el estado
    /// final. Ejecuciones de otro proceso se resuelven por replay.
    pub async fn wait(&self, execution_id: &str) -> Result<JourneyRun, IntentError> {
        let handle = self.runs.get(execution_id).map(|h| Arc::clone(h.value()));
        let Some(handle) = handle else {
            return self.replay(execution_id).await;
        };
        let mut done = handle.done.clone();
        let signal = done.wait_for(Option::is_some)
                         .await
                         .map(|v| v.clone())
                         .map_err(|_| IntentError::Storage(format!("driver for {execution_id} vanished")))?;
        match signal {
            Some(Err(e)) => Err(e),
            _ => Ok(handle.snapshot()),
        }
    }

    /// Estado actual: el vivo si la ejecución corre en este proceso, si no
    /// el reconstruido desde el WAL.
    pub async fn status(&self, execution_id: &str) -> Result<JourneyRun, IntentError> {
        if let Some(handle) = self.runs.get(execution_id).map(|h| Arc::clone(h.value())) {
            return Ok(handle.snapshot());
        }
        self.replay(execution_id).await
    }

    /// Reconstruye el estado sólo desde el WAL.
    pub async fn replay(&self, execution_id: &str) -> Result<JourneyRun, IntentError> {
        let records = self.wal.list(execution_id).await?;
        Ok(self.replay_records(execution_id, &records)?)
    }

    fn replay_records(&self, execution_id: &str, records: &[WalRecord]) -> Result<JourneyRun, JourneyError> {
        let first = records.first()
                           .ok_or_else(|| JourneyError::UnknownExecution(execution_id.to_string()))?;
        let start = JourneyStart::from_record(first)?;
        let definition = self.definition(&start.journey_id)?;
        JourneyRun::replay(&definition, records)
    }

    /// Señal de cancelación cooperativa. Los steps ya en RUNNING terminan y
    /// se registran; no se agenda nada más.
    pub async fn cancel(&self, execution_id: &str) -> Result<(), IntentError> {
        if let Some(handle) = self.runs.get(execution_id).map(|h| Arc::clone(h.value())) {
            let status = handle.snapshot().status;
            if status.is_terminal() {
                return Err(JourneyError::AlreadyTerminal { execution_id: execution_id.to_string(),
                                                           status: format!("{status:?}") }.into());
            }
            handle.cancel.cancel();
            return Ok(());
        }
        // abierta en el WAL pero sin driver en este proceso
        let run = self.replay(execution_id).await?;
        if run.status.is_terminal() {
            return Err(JourneyError::AlreadyTerminal { execution_id: execution_id.to_string(),
                                                       status: format!("{:?}", run.status) }.into());
        }
        let rec = self.wal
                      .append(NewWalRecord::journey(execution_id, Some(JourneyStatus::Running), JourneyStatus::Cancelled))
                      .await?;
        self.publisher.publish(event_for(&rec));
        Ok(())
    }

    /// Retoma toda ejecución sin registro terminal que no tenga driver vivo.
    pub async fn recover(&self) -> Result<RecoveryReport, IntentError> {
        let mut report = RecoveryReport::default();
        for execution_id in self.wal.open_executions().await? {
            if self.runs.get(&execution_id).is_some_and(|h| h.is_active()) {
                continue;
            }
            let records = self.wal.list(&execution_id).await?;
            match self.replay_records(&execution_id, &records) {
                Ok(run) => {
                    let definition = self.definition(&run.journey_id)?;
                    log::debug!("recovering journey {} from {} wal records", execution_id, records.len());
                    self.launch(definition, run);
                    report.resumed.push(execution_id);
                }
                Err(e) => {
                    log::error!("journey {} not recovered: {}", execution_id, e);
                    report.refused.push((execution_id, e.into()));
                }
            }
        }
        Ok(report)
    }
}

//! Fachada de servicio: las cuatro operaciones externas del runtime.
//!
//! - `submit_intent`: ejecuta un intent suelto y devuelve su outcome o un
//!   cuerpo de error con `error_code`.
//! - `trigger_journey`: arranca una journey y devuelve el `execution_id`.
//! - `query_status`: estado de una ejecución (intent o journey).
//! - `subscribe`: stream de eventos de una ejecución.
//!
//! Los outcomes de intents sueltos se recuerdan por `execution_id` en un
//! historial acotado (los más viejos se olvidan y pasan a NOT_FOUND); el
//! estado de journeys sale del orquestador (vivo o reconstruido desde el WAL).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use indexmap::IndexMap;
use intent_core::events::ExecutionSubscription;
use intent_core::{Artifact, ArtifactId, BroadcastPublisher, DomainEvent, ErrorCode, ExecutionContext, HandlerRegistry,
                  Intent, IntentError, IntentExecutor, JourneyDefinition, JourneyOrchestrator, JourneyRun,
                  JourneyStatus, Outcome, Params, RuntimeConfig, RuntimeStores, StepState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitIntentRequest {
    pub intent_type: String,
    #[serde(default)]
    pub params: Params,
    pub tenant_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{error_code}: {error}")]
pub struct ErrorBody {
    pub error: String,
    pub error_code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl ErrorBody {
    pub fn from_error(err: &IntentError, fallback_execution: Option<&str>) -> Self {
        Self { error: err.to_string(),
               error_code: err.code(),
               execution_id: err.execution_id().or(fallback_execution).map(str::to_string) }
    }
}

impl From<IntentError> for ErrorBody {
    fn from(err: IntentError) -> Self {
        Self::from_error(&err, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmitIntentResponse {
    Completed {
        execution_id: String,
        artifacts: Vec<Artifact>,
        events: Vec<DomainEvent>,
    },
    Failed(ErrorBody),
}

impl SubmitIntentResponse {
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            SubmitIntentResponse::Completed { execution_id, .. } => Some(execution_id),
            SubmitIntentResponse::Failed(body) => body.execution_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerJourneyRequest {
    pub journey_id: String,
    #[serde(default)]
    pub params: Params,
    pub tenant_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerJourneyResponse {
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub execution_id: String,
    pub status: JourneyStatus,
    /// Sólo journeys, en orden topológico.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_states: Option<IndexMap<String, StepState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<ArtifactId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resultado recordado de un intent suelto.
#[derive(Debug, Clone)]
enum IntentRecord {
    Completed(Outcome),
    Failed(IntentError),
}

/// Cuántos intents sueltos recuerda el servicio por defecto.
pub const DEFAULT_INTENT_HISTORY: usize = 10_000;

/// Resultados de intents sueltos, acotados por cantidad en orden de llegada.
struct IntentHistory {
    records: DashMap<String, IntentRecord>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl IntentHistory {
    fn new(capacity: usize) -> Self {
        Self { records: DashMap::new(),
               order: Mutex::new(VecDeque::new()),
               capacity: capacity.max(1) }
    }

    fn remember(&self, execution_id: String, record: IntentRecord) {
        let mut order = self.order.lock().unwrap_or_else(|p| p.into_inner());
        if self.records.insert(execution_id.clone(), record).is_none() {
            order.push_back(execution_id);
        }
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.records.remove(&oldest);
                tracing::trace!(execution_id = %oldest, "intent record evicted");
            }
        }
    }

    fn get(&self, execution_id: &str) -> Option<IntentRecord> {
        self.records.get(execution_id).map(|r| r.value().clone())
    }
}

pub struct IntentService {
    orchestrator: JourneyOrchestrator,
    publisher: Arc<BroadcastPublisher>,
    intents: IntentHistory,
}

impl IntentService {
    /// Reemplaza el publisher de `stores` por uno broadcast propio para poder
    /// ofrecer suscripciones.
    pub fn new(registry: HandlerRegistry, stores: RuntimeStores, config: RuntimeConfig) -> Result<Self, IntentError> {
        let publisher = Arc::new(BroadcastPublisher::default());
        let stores = stores.with_publisher(publisher.clone());
        let executor = IntentExecutor::new(Arc::new(registry), &stores, config)?;
        Ok(Self { orchestrator: JourneyOrchestrator::new(executor, &stores),
                  publisher,
                  intents: IntentHistory::new(DEFAULT_INTENT_HISTORY) })
    }

    /// Cambia cuántos intents sueltos quedan consultables con `query_status`.
    pub fn with_intent_history(mut self, capacity: usize) -> Self {
        self.intents = IntentHistory::new(capacity);
        self
    }

    /// Sólo durante el arranque, antes de compartir el servicio.
    pub fn compose_journey(&mut self, definition: JourneyDefinition) -> Result<(), IntentError> {
        self.orchestrator.compose_journey(definition)
    }

    pub fn orchestrator(&self) -> &JourneyOrchestrator {
        &self.orchestrator
    }

    pub async fn submit_intent(&self, req: SubmitIntentRequest) -> SubmitIntentResponse {
        let context = ExecutionContext::root(req.tenant_id, req.session_id);
        let submitted = context.execution_id.clone();
        let intent = Intent::new(req.intent_type, req.params, context);
        match self.orchestrator.executor().execute(intent).await {
            Ok(outcome) => {
                let execution_id = outcome.execution_id.clone();
                if execution_id != submitted {
                    tracing::debug!(submitted = %submitted, served_by = %execution_id, "intent served from existing execution");
                }
                self.intents.remember(execution_id.clone(), IntentRecord::Completed(outcome.clone()));
                SubmitIntentResponse::Completed { execution_id,
                                                  artifacts: outcome.artifacts,
                                                  events: outcome.events }
            }
            Err(err) => {
                let body = ErrorBody::from_error(&err, Some(&submitted));
                tracing::warn!(code = %body.error_code, error = %body.error, "intent submission failed");
                // validación y not-found no dejan rastro de ejecución
                if !matches!(err, IntentError::Validation(_) | IntentError::NotFound(_)) {
                    if let Some(exec) = &body.execution_id {
                        self.intents.remember(exec.clone(), IntentRecord::Failed(err));
                    }
                }
                SubmitIntentResponse::Failed(body)
            }
        }
    }

    pub async fn trigger_journey(&self, req: TriggerJourneyRequest) -> Result<TriggerJourneyResponse, ErrorBody> {
        let execution_id = self.orchestrator
                               .trigger(&req.journey_id, req.params, &req.tenant_id, &req.session_id)
                               .await?;
        Ok(TriggerJourneyResponse { execution_id })
    }

    /// Igual que `trigger_journey` pero suscribe antes de arrancar, de modo
    /// que el stream incluye el primer evento.
    pub async fn trigger_journey_subscribed(&self,
                                            req: TriggerJourneyRequest)
                                            -> Result<(TriggerJourneyResponse, ExecutionSubscription), ErrorBody> {
        let context = ExecutionContext::root(req.tenant_id, req.session_id);
        let subscription = self.subscribe(&context.execution_id);
        let execution_id = self.orchestrator.trigger_in(&req.journey_id, req.params, context).await?;
        Ok((TriggerJourneyResponse { execution_id }, subscription))
    }

    pub async fn query_status(&self, execution_id: &str) -> Result<StatusResponse, ErrorBody> {
        if let Some(record) = self.intents.get(execution_id) {
            return Ok(intent_status(execution_id, record));
        }
        let run = self.orchestrator.status(execution_id).await?;
        Ok(self.journey_status(run))
    }

    /// Eventos de la ejecución (y de sus steps) desde ahora; termina con el
    /// evento terminal.
    pub fn subscribe(&self, execution_id: &str) -> ExecutionSubscription {
        self.publisher.subscribe(execution_id)
    }

    fn journey_status(&self, run: JourneyRun) -> StatusResponse {
        let order: Vec<String> = match self.orchestrator.journey(&run.journey_id) {
            Some(def) => def.topo_order().to_vec(),
            None => run.step_states.keys().cloned().collect(),
        };
        let step_states: IndexMap<String, StepState> =
            order.iter()
                 .filter_map(|step| run.step_states.get(step).map(|s| (step.clone(), *s)))
                 .collect();
        let artifacts: Vec<ArtifactId> = order.iter()
                                              .filter_map(|step| run.outputs.get(step))
                                              .flatten()
                                              .cloned()
                                              .collect();
        let error = order.iter()
                         .find(|step| run.step_states.get(*step) == Some(&StepState::Failed))
                         .map(|step| {
                             let cause = run.errors.get(step).map(String::as_str).unwrap_or("failed");
                             format!("step {step}: {cause}")
                         });
        StatusResponse { execution_id: run.execution_id,
                         status: run.status,
                         step_states: Some(step_states),
                         artifacts: Some(artifacts),
                         error }
    }
}

fn intent_status(execution_id: &str, record: IntentRecord) -> StatusResponse {
    match record {
        IntentRecord::Completed(outcome) => StatusResponse { execution_id: execution_id.to_string(),
                                                             status: JourneyStatus::Completed,
                                                             step_states: None,
                                                             artifacts: Some(outcome.artifact_ids()),
                                                             error: None },
        IntentRecord::Failed(err) => StatusResponse { execution_id: execution_id.to_string(),
                                                      status: JourneyStatus::Failed,
                                                      step_states: None,
                                                      artifacts: None,
                                                      error: Some(err.to_string()) },
    }
}

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::errors::IntentError;
use crate::events::EventDraft;
use crate::executor::ArtifactStager;
use crate::model::{ArtifactDraft, ArtifactId, ExecutionContext, Params};

/// Fallo reportado por un handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Reintentable.
    #[error("{0}")]
    Failed(String),
    /// Reintentar no cambia el resultado.
    #[error("{0}")]
    Permanent(String),
}

/// Lo que devuelve un handler exitoso.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    pub artifacts: Vec<ArtifactDraft>,
    pub events: Vec<EventDraft>,
}

impl HandlerOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, draft: ArtifactDraft) -> Self {
        self.artifacts.push(draft);
        self
    }

    pub fn with_event(mut self, event: EventDraft) -> Self {
        self.events.push(event);
        self
    }
}

/// Contexto que recibe un handler en cada invocación.
#[derive(Clone)]
pub struct HandlerContext {
    pub execution: ExecutionContext,
    pub intent_type: String,
    /// Outputs de los steps de los que depende (vacío fuera de journeys).
    pub inputs: BTreeMap<String, Vec<ArtifactId>>,
    stager: Arc<ArtifactStager>,
}

impl HandlerContext {
    pub(crate) fn new(execution: ExecutionContext,
                      intent_type: String,
                      inputs: BTreeMap<String, Vec<ArtifactId>>,
                      stager: Arc<ArtifactStager>)
                      -> Self {
        Self { execution,
               intent_type,
               inputs,
               stager }
    }

    /// Todos los artifacts de entrada, sin repetir.
    pub fn input_ids(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<ArtifactId> = self.inputs.values().flatten().cloned().collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Registra ya mismo un artifact PENDING. Si la invocación falla queda
    /// FAILED; si termina bien pasa a READY junto con los del output. Después
    /// de un timeout el contexto está cerrado y esto falla.
    pub async fn stage_artifact(&self, draft: ArtifactDraft) -> Result<ArtifactId, IntentError> {
        self.stager.stage(draft).await
    }
}

/// Capacidad que ejecuta un tipo de intent.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    /// Params que deben estar presentes y no ser null.
    fn required_params(&self) -> &[&str] {
        &[]
    }

    /// Validación previa a todo estado de idempotencia.
    fn validate(&self, params: &Params) -> Result<(), String> {
        for name in self.required_params() {
            match params.get(*name) {
                None | Some(Value::Null) => return Err(format!("missing required param '{name}'")),
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn handle(&self, params: Params, ctx: HandlerContext) -> Result<HandlerOutput, HandlerError>;
}

/// Adaptador de closures a `IntentHandler`.
pub struct FnHandler<F> {
    required: Vec<&'static str>,
    f: F,
}

impl<F, Fut> FnHandler<F>
    where F: Fn(Params, HandlerContext) -> Fut + Send + Sync,
          Fut: Future<Output = Result<HandlerOutput, HandlerError>> + Send
{
    pub fn new(required: &[&'static str], f: F) -> Self {
        Self { required: required.to_vec(),
               f }
    }
}

#[async_trait]
impl<F, Fut> IntentHandler for FnHandler<F>
    where F: Fn(Params, HandlerContext) -> Fut + Send + Sync,
          Fut: Future<Output = Result<HandlerOutput, HandlerError>> + Send
{
    fn required_params(&self) -> &[&str] {
        &self.required
    }

    async fn handle(&self, params: Params, ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        (self.f)(params, ctx).await
    }
}

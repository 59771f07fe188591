#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use intent_core::{ArtifactDraft, EventDraft, HandlerContext, HandlerError, HandlerOutput, IntentHandler, Params};
use serde_json::{json, Value};
use tokio::sync::Notify;

pub fn params(v: Value) -> Params {
    v.as_object().cloned().unwrap_or_default()
}

#[derive(Default, Clone)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Produce un artifact por invocación y un evento de dominio.
pub struct Producer {
    pub calls: Calls,
    pub artifact_type: &'static str,
    pub delay: Duration,
    pub required: Vec<&'static str>,
}

impl Producer {
    pub fn new(calls: Calls, artifact_type: &'static str) -> Self {
        Self { calls,
               artifact_type,
               delay: Duration::ZERO,
               required: vec![] }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requiring(mut self, required: &[&'static str]) -> Self {
        self.required = required.to_vec();
        self
    }
}

#[async_trait]
impl IntentHandler for Producer {
    fn required_params(&self) -> &[&str] {
        &self.required
    }

    async fn handle(&self, params: Params, ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let n = self.calls.hit();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut echo = params;
        echo.remove("inputs");
        Ok(HandlerOutput::new().with_artifact(ArtifactDraft::new(self.artifact_type,
                                                                 json!({ "call": n,
                                                                         "params": echo,
                                                                         "execution_id": ctx.execution.execution_id })))
                               .with_event(EventDraft::new("demo.produced", json!({ "type": self.artifact_type }))))
    }
}

/// Registra un artifact parcial y luego falla.
pub struct Failing {
    pub calls: Calls,
    pub permanent: bool,
}

#[async_trait]
impl IntentHandler for Failing {
    async fn handle(&self, _params: Params, ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        self.calls.hit();
        ctx.stage_artifact(ArtifactDraft::new("partial", json!({"complete": false})))
           .await
           .map_err(|e| HandlerError::Failed(e.to_string()))?;
        if self.permanent {
            Err(HandlerError::Permanent("source document is unreadable".into()))
        } else {
            Err(HandlerError::Failed("upstream unavailable".into()))
        }
    }
}

/// Falla las primeras `fail_times` invocaciones.
pub struct Flaky {
    pub calls: Calls,
    pub fail_times: usize,
}

#[async_trait]
impl IntentHandler for Flaky {
    async fn handle(&self, _params: Params, _ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let n = self.calls.hit();
        if n <= self.fail_times {
            return Err(HandlerError::Failed(format!("transient failure #{n}")));
        }
        Ok(HandlerOutput::new().with_artifact(ArtifactDraft::new("flaky", json!({"succeeded_on": n}))))
    }
}

/// Bloquea hasta que se abra la compuerta.
pub struct Gated {
    pub calls: Calls,
    pub started: Arc<Notify>,
    pub gate: Arc<Notify>,
}

#[async_trait]
impl IntentHandler for Gated {
    async fn handle(&self, _params: Params, _ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        self.calls.hit();
        self.started.notify_one();
        self.gate.notified().await;
        Ok(HandlerOutput::new().with_artifact(ArtifactDraft::new("gated", json!({}))))
    }
}

/// Mide la concurrencia máxima observada.
#[derive(Default, Clone)]
pub struct PeakTracker {
    pub current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

#[async_trait]
impl IntentHandler for PeakTracker {
    async fn handle(&self, _params: Params, _ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(HandlerOutput::new())
    }
}

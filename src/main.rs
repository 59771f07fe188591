//! Demo de punta a punta: intents duplicados concurrentes y una journey de
//! cuatro steps con su stream de eventos.
//!
//! Backends según entorno (`DATABASE_URL`, `INTENTFLOW_WAL_PATH`); sin nada
//! configurado todo corre en memoria.

use intentflow::bootstrap::build_stores;
use intentflow::config::config;
use intentflow::demo::{demo_registry, document_matching_journey, DOCUMENT_MATCHING, MATCH_SOURCE_TO_TARGET};
use intentflow::{IntentService, SubmitIntentRequest, TriggerJourneyRequest};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
                             .init();
    if let Err(e) = run().await {
        eprintln!("[intentflow-demo] {e}");
        std::process::exit(1);
    }
}

fn params(v: serde_json::Value) -> intent_core::Params {
    v.as_object().cloned().unwrap_or_default()
}

type DemoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

async fn run() -> DemoResult<()> {
    let cfg = config()?;
    let (stores, backend) = build_stores(cfg)?;
    tracing::info!(%backend, "runtime stores ready");

    let mut service = IntentService::new(demo_registry()?, stores, cfg.runtime.clone())?.with_intent_history(cfg.intent_history);
    service.compose_journey(document_matching_journey()?)?;

    let report = service.orchestrator().recover().await?;
    if !report.resumed.is_empty() || !report.refused.is_empty() {
        tracing::info!(resumed = ?report.resumed, refused = report.refused.len(), "recovery finished");
    }

    // Dos envíos idénticos en paralelo: un solo handler, mismo outcome.
    let submit = || SubmitIntentRequest { intent_type: MATCH_SOURCE_TO_TARGET.to_string(),
                                          params: params(json!({ "source_embedding": "e1",
                                                                 "target_embedding": "e2" })),
                                          tenant_id: "t1".to_string(),
                                          session_id: "demo".to_string() };
    let (first, second) = tokio::join!(service.submit_intent(submit()), service.submit_intent(submit()));
    println!("submit #1: {}", to_json(&first));
    println!("submit #2: {}", to_json(&second));

    let request = TriggerJourneyRequest { journey_id: DOCUMENT_MATCHING.to_string(),
                                          params: params(json!({ "document": "Intro\n\nBody\n\nAnnex" })),
                                          tenant_id: "t1".to_string(),
                                          session_id: "demo".to_string() };
    let (started, mut events) = service.trigger_journey_subscribed(request).await?;
    println!("journey started: {}", started.execution_id);
    while let Some(ev) = events.next().await {
        println!("  event {:<18} step={:<8} {}",
                 ev.event_type,
                 ev.step_name.as_deref().unwrap_or("-"),
                 ev.payload);
    }
    if events.lagged() {
        tracing::warn!("event stream fell behind; waiting for the journey to finish");
        service.orchestrator().wait(&started.execution_id).await?;
    }
    match service.query_status(&started.execution_id).await {
        Ok(status) => println!("status: {}", to_json(&status)),
        Err(body) => println!("status error: {}", to_json(&body)),
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

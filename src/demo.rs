//! Handlers de demostración y la journey `document_matching`.
//!
//! El contenido semántico (parseo, embeddings, matching) es deliberadamente
//! trivial y determinista: lo que interesa es el contrato con el runtime.

use async_trait::async_trait;
use intent_core::hashing::hash_str;
use intent_core::{ArtifactDraft, EventDraft, HandlerContext, HandlerError, HandlerOutput, HandlerRegistry,
                  IntentError, IntentHandler, JourneyDefinition, Params, StepSpec};
use serde_json::{json, Value};

pub const PARSE_DOCUMENT: &str = "parse_document";
pub const EMBED_DOCUMENT: &str = "embed_document";
pub const MATCH_SOURCE_TO_TARGET: &str = "match_source_to_target";
pub const SYNTHESIZE_REPORT: &str = "synthesize_report";

pub const DOCUMENT_MATCHING: &str = "document_matching";

fn simulated_failure(params: &Params) -> Result<(), HandlerError> {
    match params.get("simulate_failure").and_then(Value::as_str) {
        Some("permanent") => Err(HandlerError::Permanent("simulated permanent failure".into())),
        Some(_) => Err(HandlerError::Failed("simulated failure".into())),
        None => Ok(()),
    }
}

/// Puntaje estable en [0, 1] derivado del hash de dos claves.
fn confidence(a: &str, b: &str) -> f64 {
    let digest = hash_str(&format!("{a}|{b}"));
    let head = u16::from_str_radix(&digest[..4], 16).unwrap_or(0);
    (f64::from(head) / f64::from(u16::MAX) * 1000.0).round() / 1000.0
}

fn ids_json(ctx: &HandlerContext) -> Value {
    json!(ctx.input_ids().iter().map(|id| id.as_str().to_string()).collect::<Vec<_>>())
}

pub struct ParseDocument;

#[async_trait]
impl IntentHandler for ParseDocument {
    fn required_params(&self) -> &[&str] {
        &["document"]
    }

    async fn handle(&self, params: Params, _ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        simulated_failure(&params)?;
        let document = params.get("document").cloned().unwrap_or(Value::Null);
        let text = document.as_str().unwrap_or_default();
        let sections = text.split("\n\n").filter(|s| !s.trim().is_empty()).count();
        Ok(HandlerOutput::new().with_artifact(ArtifactDraft::new("ParsedDocument",
                                                                 json!({ "document": document,
                                                                         "sections": sections }))))
    }
}

pub struct EmbedDocument;

#[async_trait]
impl IntentHandler for EmbedDocument {
    async fn handle(&self, params: Params, ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        simulated_failure(&params)?;
        let sources = ids_json(&ctx);
        let embedding_id = format!("emb-{}", &hash_str(&sources.to_string())[..12]);
        Ok(HandlerOutput::new().with_artifact(ArtifactDraft::new("Embedding",
                                                                 json!({ "embedding_id": embedding_id,
                                                                         "sources": sources }))))
    }
}

/// Matching fuente/destino. Fuera de una journey recibe los embeddings por
/// params; dentro, los toma de sus inputs.
pub struct MatchSourceToTarget;

#[async_trait]
impl IntentHandler for MatchSourceToTarget {
    fn validate(&self, params: &Params) -> Result<(), String> {
        let has_inputs = params.get("inputs").and_then(Value::as_object).is_some_and(|m| !m.is_empty());
        let has_pair = ["source_embedding", "target_embedding"].iter()
                                                               .all(|k| params.get(*k).is_some_and(|v| !v.is_null()));
        if has_inputs || has_pair {
            Ok(())
        } else {
            Err("match_source_to_target needs source_embedding and target_embedding (or upstream inputs)".into())
        }
    }

    async fn handle(&self, params: Params, ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        simulated_failure(&params)?;
        let key = |k: &str| {
            params.get(k)
                  .filter(|v| !v.is_null())
                  .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
        };
        let (source, target) = match (key("source_embedding"), key("target_embedding")) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                let ids = ctx.input_ids();
                let first = ids.first().map(|i| i.as_str().to_string()).unwrap_or_default();
                let last = ids.last().map(|i| i.as_str().to_string()).unwrap_or_default();
                (first, last)
            }
        };
        let score = confidence(&source, &target);
        Ok(HandlerOutput::new().with_artifact(ArtifactDraft::new("MatchResult",
                                                                 json!({ "source": source,
                                                                         "target": target,
                                                                         "confidence": score })))
                               .with_event(EventDraft::new("match.scored", json!({ "confidence": score }))))
    }
}

pub struct SynthesizeReport;

#[async_trait]
impl IntentHandler for SynthesizeReport {
    async fn handle(&self, params: Params, ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        simulated_failure(&params)?;
        let title = params.get("title").and_then(Value::as_str).unwrap_or("matching report").to_string();
        Ok(HandlerOutput::new().with_artifact(ArtifactDraft::new("Report",
                                                                 json!({ "title": title,
                                                                         "based_on": ids_json(&ctx) }))))
    }
}

/// Registry con los cuatro handlers de demostración.
pub fn demo_registry() -> Result<HandlerRegistry, IntentError> {
    let mut registry = HandlerRegistry::new();
    registry.register(PARSE_DOCUMENT, ParseDocument)?;
    registry.register(EMBED_DOCUMENT, EmbedDocument)?;
    registry.register(MATCH_SOURCE_TO_TARGET, MatchSourceToTarget)?;
    registry.register(SYNTHESIZE_REPORT, SynthesizeReport)?;
    Ok(registry)
}

/// parse -> embed -> match -> report
pub fn document_matching_journey() -> Result<JourneyDefinition, IntentError> {
    Ok(JourneyDefinition::new(DOCUMENT_MATCHING,
                              vec![StepSpec::new("parse", PARSE_DOCUMENT),
                                   StepSpec::new("embed", EMBED_DOCUMENT).after(["parse"]),
                                   StepSpec::new("match", MATCH_SOURCE_TO_TARGET).after(["embed"]),
                                   StepSpec::new("report", SYNTHESIZE_REPORT).after(["match"]),])?)
}

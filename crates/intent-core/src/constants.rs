//! Constantes del runtime.
//!
//! `ENGINE_VERSION` forma parte del input de todo fingerprint: cambiarla
//! invalida deterministamente las entradas previas del ledger de idempotencia
//! aunque el intent y sus params no cambien. Mantener estable mientras no haya
//! cambios incompatibles en la normalización.
pub const ENGINE_VERSION: &str = "I1.0";

/// Clave reservada dentro de los params de un step: mapa `dependencia ->
/// [artifact ids]` con los outputs de los steps de los que depende.
pub const INPUTS_PARAM: &str = "inputs";

/// Tipos de evento publicados por el runtime.
pub mod event_types {
    pub const INTENT_COMPLETED: &str = "intent.completed";
    pub const INTENT_FAILED: &str = "intent.failed";
    pub const JOURNEY_STARTED: &str = "journey.started";
    pub const JOURNEY_COMPLETED: &str = "journey.completed";
    pub const JOURNEY_FAILED: &str = "journey.failed";
    pub const JOURNEY_CANCELLED: &str = "journey.cancelled";
    pub const STEP_RUNNING: &str = "step.running";
    pub const STEP_DONE: &str = "step.done";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_SKIPPED: &str = "step.skipped";
    pub const STEP_RETRY: &str = "step.retry";
}

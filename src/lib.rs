//! IntentFlow
//!
//! Librería de aplicación sobre `intent-core`:
//! - `config`: configuración del proceso desde variables de entorno (.env).
//! - `bootstrap`: elige backends (memoria, WAL en archivo, Postgres).
//! - `service`: fachada con las operaciones externas (submit, trigger,
//!   status, subscribe).
//! - `demo`: handlers y journey de ejemplo usados por los binarios.

pub mod bootstrap;
pub mod config;
pub mod demo;
pub mod service;

pub use config::AppConfig;
pub use service::{ErrorBody, IntentService, StatusResponse, SubmitIntentRequest, SubmitIntentResponse,
                  TriggerJourneyRequest, TriggerJourneyResponse};

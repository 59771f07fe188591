//! Ejecución de un intent con idempotencia, lineage y eventos.

#[allow(clippy::module_inception)]
pub mod executor;
pub mod staging;

pub use executor::IntentExecutor;
pub use staging::ArtifactStager;

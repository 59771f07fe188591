//! Journeys: definición, estado reconstruible y orquestación.

pub mod definition;
mod driver;
pub mod errors;
pub mod orchestrator;
pub mod run;

pub use definition::{JourneyDefinition, StepSpec};
pub use errors::JourneyError;
pub use orchestrator::{JourneyOrchestrator, RecoveryReport};
pub use run::{event_for, JourneyRun, JourneyStart};

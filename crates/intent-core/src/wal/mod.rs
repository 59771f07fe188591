//! Write-ahead log de journeys: fuente de verdad del progreso.

pub mod file;
pub mod memory;
pub mod store;
pub mod types;

pub use file::FileWal;
pub use memory::InMemoryWal;
pub use store::{distinct_executions, open_in, WalStore};
pub use types::{JourneyStatus, NewWalRecord, RecordState, StepState, WalError, WalRecord};

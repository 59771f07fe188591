//! intent-core: ejecución idempotente de intents y orquestación de journeys
pub mod artifact;
pub mod clock;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod executor;
pub mod hashing;
pub mod journey;
pub mod ledger;
pub mod model;
pub mod registry;
pub mod stores;
pub mod wal;

pub use artifact::{ArtifactError, ArtifactStore, InMemoryArtifactStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RuntimeConfig;
pub use errors::{classify_error, ErrorClass, ErrorCode, IntentError};
pub use events::{BroadcastPublisher, DomainEvent, EventDraft, EventPublisher, InMemoryPublisher, NoopPublisher};
pub use executor::IntentExecutor;
pub use journey::{JourneyDefinition, JourneyOrchestrator, JourneyRun, RecoveryReport, StepSpec};
pub use ledger::{ClaimOutcome, ClaimToken, IdempotencyLedger, IdempotencyRecord, InMemoryLedger};
pub use model::{Artifact, ArtifactDraft, ArtifactId, ExecutionContext, Fingerprint, Intent, LifecycleState, Outcome, Params};
pub use registry::{FnHandler, HandlerContext, HandlerError, HandlerOutput, HandlerRegistry, IntentHandler};
pub use stores::RuntimeStores;
pub use wal::{FileWal, InMemoryWal, JourneyStatus, StepState, WalRecord, WalStore};

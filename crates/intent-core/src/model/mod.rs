//! Modelos neutrales (Intent, ExecutionContext, Artifact, Fingerprint, Outcome).

pub mod artifact;
pub mod context;
pub mod fingerprint;
pub mod intent;
pub mod outcome;

pub use artifact::{Artifact, ArtifactDraft, ArtifactId, LifecycleState, ProducedBy};
pub use context::ExecutionContext;
pub use fingerprint::{Fingerprint, FingerprintInput};
pub use intent::{Intent, Params};
pub use outcome::Outcome;

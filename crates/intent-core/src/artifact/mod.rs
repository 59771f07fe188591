//! Artifact store: cuerpos de artifacts y grafo de lineage.

pub mod errors;
pub mod memory;
pub mod store;

pub use errors::ArtifactError;
pub use memory::InMemoryArtifactStore;
pub use store::{check_registrable, ArtifactStore};

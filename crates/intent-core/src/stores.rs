use std::sync::Arc;

use crate::artifact::{ArtifactStore, InMemoryArtifactStore};
use crate::clock::Clock;
use crate::events::{EventPublisher, NoopPublisher};
use crate::ledger::{IdempotencyLedger, InMemoryLedger};
use crate::wal::{InMemoryWal, WalStore};

/// Backends compartidos por executor y orquestador.
#[derive(Clone)]
pub struct RuntimeStores {
    pub ledger: Arc<dyn IdempotencyLedger>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub wal: Arc<dyn WalStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
}

impl RuntimeStores {
    /// Todo en memoria, publisher no-op.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self { ledger: Arc::new(InMemoryLedger::new(clock.clone())),
               artifacts: Arc::new(InMemoryArtifactStore::new()),
               wal: Arc::new(InMemoryWal::new(clock.clone())),
               publisher: Arc::new(NoopPublisher),
               clock }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn IdempotencyLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_wal(mut self, wal: Arc<dyn WalStore>) -> Self {
        self.wal = wal;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }
}

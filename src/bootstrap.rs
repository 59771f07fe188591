//! Selección de backends según `AppConfig`.
//!
//! Prioridad: Postgres (`DATABASE_URL`) > WAL en archivo
//! (`INTENTFLOW_WAL_PATH`) > todo en memoria. Con WAL en archivo, ledger y
//! artifacts siguen en memoria: sólo el progreso de journeys sobrevive al
//! reinicio.

use std::sync::Arc;

use intent_core::{Clock, FileWal, IntentError, NoopPublisher, RuntimeStores, SystemClock};
use intent_persistence::pg::{build_pool, runtime_stores};

use crate::config::AppConfig;

/// Qué backend quedó activo (para logs y la salida de la CLI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    InMemory,
    FileWal(String),
    Postgres,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::InMemory => f.write_str("in-memory"),
            Backend::FileWal(path) => write!(f, "file-wal({path})"),
            Backend::Postgres => f.write_str("postgres"),
        }
    }
}

pub fn build_stores(cfg: &AppConfig) -> Result<(RuntimeStores, Backend), IntentError> {
    build_stores_with_clock(cfg, Arc::new(SystemClock))
}

pub fn build_stores_with_clock(cfg: &AppConfig, clock: Arc<dyn Clock>) -> Result<(RuntimeStores, Backend), IntentError> {
    if let Some(db) = &cfg.database {
        let pool = build_pool(&db.url, db.min_connections, db.max_connections)
            .map_err(|e| IntentError::Storage(e.to_string()))?;
        tracing::info!(min = db.min_connections, max = db.max_connections, "postgres backends ready");
        return Ok((runtime_stores(pool, clock, Arc::new(NoopPublisher)), Backend::Postgres));
    }
    if let Some(path) = &cfg.wal_path {
        let wal = FileWal::open(path, clock.clone())?;
        tracing::info!(path = %path.display(), "file wal opened");
        let stores = RuntimeStores::in_memory(clock).with_wal(Arc::new(wal));
        return Ok((stores, Backend::FileWal(path.display().to_string())));
    }
    Ok((RuntimeStores::in_memory(clock), Backend::InMemory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use intent_core::WalStore;

    #[tokio::test]
    async fn picks_file_wal_when_path_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.wal");
        let mut cfg = AppConfig::from_lookup(|_| None).unwrap();
        cfg.wal_path = Some(path.clone());
        let (stores, backend) = build_stores(&cfg).unwrap();
        assert_eq!(backend, Backend::FileWal(path.display().to_string()));
        assert!(stores.wal.execution_ids().await.unwrap().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn defaults_to_memory() {
        let cfg = AppConfig::from_lookup(|_| None).unwrap();
        let (_, backend) = build_stores(&cfg).unwrap();
        assert_eq!(backend, Backend::InMemory);
    }
}

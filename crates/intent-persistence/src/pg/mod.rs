//! Implementaciones Postgres (Diesel) de los stores del core.
//!
//! - `PgWalStore`: WAL append-only con orden total por `seq` (BIGSERIAL); un
//!   trigger rechaza UPDATE/DELETE.
//! - `PgIdempotencyLedger`: claims con lease en `idempotency_ledger`; toda
//!   escritura posterior al claim está cercada por `execution_id`.
//! - `PgArtifactStore`: artifacts + `artifact_lineage`; el chequeo de ciclos
//!   corre dentro de una transacción SERIALIZABLE.
//!
//! Diesel es síncrono: cada operación corre en `spawn_blocking` con una
//! conexión del pool y reintento ante errores transitorios.

mod artifacts;
mod ledger;
mod wal;

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use intent_core::{Clock, EventPublisher, RuntimeStores};
use log::warn;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;

pub use artifacts::PgArtifactStore;
pub use ledger::PgIdempotencyLedger;
pub use wal::PgWalStore;

/// Pool r2d2 de conexiones Postgres. Al construirlo se corren las
/// migraciones pendientes una sola vez.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones (pool real o uno fabricado en tests).
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Reintento con backoff corto (hasta 3 reintentos: 15ms, 30ms, 45ms).
///
/// Sólo repite la unidad de trabajo de `f`; las transacciones dentro de `f`
/// se revierten completas antes de cada reintento.
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if e.is_retryable() && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Corre `f` con una conexión del pool en el pool de hilos bloqueantes de
/// tokio, con `with_retry` alrededor.
pub(crate) async fn run_blocking<P, F, T>(provider: &Arc<P>, mut f: F) -> Result<T, PersistenceError>
    where P: ConnectionProvider,
          F: FnMut(&mut PgConnection) -> Result<T, PersistenceError> + Send + 'static,
          T: Send + 'static
{
    let provider = Arc::clone(provider);
    tokio::task::spawn_blocking(move || {
        with_retry(|| {
            let mut conn = provider.connection()?;
            f(&mut *conn)
        })
    }).await
      .map_err(|e| PersistenceError::Unknown(format!("blocking task: {e}")))?
}

/// Postgres guarda microsegundos; truncar antes de escribir mantiene iguales
/// el valor devuelto al llamador y el que se relee después.
pub(crate) fn db_time(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(6)
}

/// Construye un pool Postgres r2d2 y aplica las migraciones.
///
/// Tamaños en cero se elevan a 1; si `min_size > max_size` se usa
/// `min = max`.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("min_size > max_size ({} > {}), ajustando min=max", validated_min, validated_max);
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(validated_min.min(validated_max)))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Carga `.env`, lee `DbConfig` y construye un pool ya migrado. `Ok(None)`
/// si no hay `DATABASE_URL`.
pub fn build_dev_pool_from_env() -> Result<Option<PgPool>, PersistenceError> {
    crate::config::init_dotenv();
    match crate::config::DbConfig::from_env() {
        Some(cfg) => build_pool(&cfg.url, cfg.min_connections, cfg.max_connections).map(Some),
        None => Ok(None),
    }
}

/// Los tres stores durables sobre un mismo pool, listos para el runtime.
pub fn runtime_stores(pool: PgPool, clock: Arc<dyn Clock>, publisher: Arc<dyn EventPublisher>) -> RuntimeStores {
    let provider = PoolProvider { pool };
    RuntimeStores::in_memory(clock.clone()).with_ledger(Arc::new(PgIdempotencyLedger::new(provider.clone(),
                                                                                         clock.clone())))
                                           .with_artifacts(Arc::new(PgArtifactStore::new(provider.clone())))
                                           .with_wal(Arc::new(PgWalStore::new(provider, clock)))
                                           .with_publisher(publisher)
}

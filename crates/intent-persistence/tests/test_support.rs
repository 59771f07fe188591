#![allow(dead_code)]

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use intent_core::{Clock, ManualClock};
use intent_persistence::config::DbConfig;
use intent_persistence::pg::{build_pool, PgPool, PoolProvider};
use once_cell::sync::Lazy;

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    let cfg = DbConfig::from_env()?;
    match build_pool(&cfg.url, 1, 4) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("No se pudo construir pool de test: {e}");
            None
        }
    }
});

/// Provider sobre el pool compartido; `None` (y el test se salta) sin
/// `DATABASE_URL`.
pub fn provider(test: &str) -> Option<PoolProvider> {
    match TEST_POOL.as_ref() {
        Some(pool) => Some(PoolProvider { pool: pool.clone() }),
        None => {
            eprintln!("skip {test} (no DATABASE_URL)");
            None
        }
    }
}

/// Reloj manual con precisión de microsegundos, la misma que guarda Postgres.
pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc::now().trunc_subsecs(6)))
}

pub fn as_clock(c: &Arc<ManualClock>) -> Arc<dyn Clock> {
    c.clone()
}

/// Prefijo único por test: la base es compartida entre corridas.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) una sola vez y expone `CONFIG`.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use intent_core::{IntentError, RuntimeConfig};
use intent_persistence::DbConfig;
use once_cell::sync::Lazy;

use crate::service::DEFAULT_INTENT_HISTORY;

/// Configuración del proceso.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    /// WAL en archivo (JSON lines). Sin valor, el WAL vive en memoria.
    pub wal_path: Option<PathBuf>,
    /// Backends Postgres. Tiene prioridad sobre `wal_path`.
    pub database: Option<DbConfig>,
    /// Intents sueltos que el servicio recuerda para `query_status`.
    pub intent_history: usize,
}

/// Instancia global perezosa, evaluada una sola vez.
pub static CONFIG: Lazy<Result<AppConfig, IntentError>> = Lazy::new(AppConfig::from_env);

impl AppConfig {
    pub fn from_env() -> Result<Self, IntentError> {
        intent_persistence::init_dotenv();
        let mut cfg = Self::from_lookup(|k| env::var(k).ok())?;
        cfg.database = DbConfig::from_env();
        Ok(cfg)
    }

    /// Lee las claves `INTENTFLOW_*` desde `lookup`. No toca la base de datos.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IntentError>
        where F: Fn(&str) -> Option<String>
    {
        let mut runtime = RuntimeConfig::default();
        if let Some(n) = parse::<usize>(&lookup, "INTENTFLOW_MAX_CONCURRENCY")? {
            runtime = runtime.with_max_concurrency(n);
        }
        if let Some(ms) = parse::<u64>(&lookup, "INTENTFLOW_HANDLER_TIMEOUT_MS")? {
            runtime = runtime.with_handler_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = parse::<u64>(&lookup, "INTENTFLOW_LEASE_TTL_MS")? {
            runtime = runtime.with_lease_ttl(Duration::from_millis(ms));
        }
        if let Some(n) = parse::<u32>(&lookup, "INTENTFLOW_MAX_ATTEMPTS")? {
            runtime = runtime.with_default_max_attempts(n);
        }
        runtime.validate()?;
        let intent_history = parse::<usize>(&lookup, "INTENTFLOW_INTENT_HISTORY")?.unwrap_or(DEFAULT_INTENT_HISTORY);
        if intent_history == 0 {
            return Err(IntentError::Validation("INTENTFLOW_INTENT_HISTORY must be > 0".into()));
        }
        let wal_path = lookup("INTENTFLOW_WAL_PATH").filter(|p| !p.trim().is_empty()).map(PathBuf::from);
        Ok(Self { runtime,
                  wal_path,
                  database: None,
                  intent_history })
    }
}

/// Configuración global o el error de carga.
pub fn config() -> Result<&'static AppConfig, IntentError> {
    CONFIG.as_ref().map_err(Clone::clone)
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, IntentError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim()
                        .parse()
                        .map(Some)
                        .map_err(|_| IntentError::Validation(format!("{key}: cannot parse '{raw}'"))),
    }
}

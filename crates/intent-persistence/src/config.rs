//! Configuración de conexión desde variables de entorno.
//! Convención `DATABASE_URL` más tamaños opcionales de pool.

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    /// `None` si `DATABASE_URL` no está definido: el llamador decide si cae
    /// al backend en memoria o aborta.
    pub fn from_env() -> Option<Self> {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL").ok().filter(|u| !u.trim().is_empty())?;
        let min_connections = parse_var("DATABASE_MIN_CONNECTIONS").unwrap_or(2);
        let max_connections = parse_var("DATABASE_MAX_CONNECTIONS").unwrap_or(16);
        Some(Self { url,
                    min_connections,
                    max_connections })
    }
}

fn parse_var(name: &str) -> Option<u32> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Forzar carga temprana de .env desde aplicaciones externas.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

//! Backend Postgres (Diesel + r2d2) para los stores del runtime: WAL de
//! journeys, ledger de idempotencia y artifacts con lineage.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgArtifactStore, PgIdempotencyLedger, PgPool,
             PgWalStore, PoolProvider};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Text;
use intent_core::wal::{NewWalRecord, RecordState, WalError, WalRecord, WalStore};
use intent_core::Clock;
use log::debug;
use serde_json::Value;

use super::{db_time, run_blocking, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::journey_wal;

#[derive(Insertable, Debug)]
#[diesel(table_name = journey_wal)]
struct NewWalRow<'a> {
    execution_id: &'a str,
    step_name: Option<&'a str>,
    from_state: Option<&'a str>,
    to_state: &'a str,
    ts: DateTime<Utc>,
    payload_ref: Option<&'a Value>,
}

#[derive(Queryable, Debug)]
struct WalRow {
    seq: i64,
    execution_id: String,
    step_name: Option<String>,
    from_state: Option<String>,
    to_state: String,
    ts: DateTime<Utc>,
    payload_ref: Option<Value>,
}

impl WalRow {
    fn into_record(self) -> Result<WalRecord, WalError> {
        let from_state = self.from_state.as_deref().map(str::parse::<RecordState>).transpose()?;
        Ok(WalRecord { seq: self.seq as u64,
                       execution_id: self.execution_id,
                       step_name: self.step_name,
                       from_state,
                       to_state: self.to_state.parse()?,
                       timestamp: self.ts,
                       payload_ref: self.payload_ref })
    }
}

#[derive(QueryableByName, Debug)]
struct ExecutionIdRow {
    #[diesel(sql_type = Text)]
    execution_id: String,
}

const EXECUTION_IDS_SQL: &str = "SELECT execution_id FROM journey_wal GROUP BY execution_id ORDER BY MIN(seq)";

// Abierta = sin registro de journey (step_name NULL) en estado terminal.
const OPEN_EXECUTIONS_SQL: &str = "SELECT execution_id FROM journey_wal GROUP BY execution_id \
                                   HAVING NOT bool_or(step_name IS NULL AND to_state IN ('COMPLETED', 'FAILED', 'CANCELLED')) \
                                   ORDER BY MIN(seq)";

/// WAL en Postgres. `seq` lo asigna la base (global a la tabla), así que el
/// orden por ejecución es el orden de commit de los appends.
pub struct PgWalStore<P: ConnectionProvider> {
    provider: Arc<P>,
    clock: Arc<dyn Clock>,
}

impl<P: ConnectionProvider> PgWalStore<P> {
    pub fn new(provider: P, clock: Arc<dyn Clock>) -> Self {
        Self { provider: Arc::new(provider),
               clock }
    }

    async fn load_ids(&self, sql: &'static str) -> Result<Vec<String>, WalError> {
        let rows: Vec<ExecutionIdRow> =
            run_blocking(&self.provider, move |conn| diesel::sql_query(sql).load(conn).map_err(PersistenceError::from)).await?;
        Ok(rows.into_iter().map(|r| r.execution_id).collect())
    }
}

#[async_trait]
impl<P: ConnectionProvider> WalStore for PgWalStore<P> {
    async fn append(&self, record: NewWalRecord) -> Result<WalRecord, WalError> {
        let ts = db_time(self.clock.now());
        let rec = record.clone();
        let seq: i64 = run_blocking(&self.provider, move |conn| {
                           let row = NewWalRow { execution_id: &rec.execution_id,
                                                 step_name: rec.step_name.as_deref(),
                                                 from_state: rec.from_state.map(RecordState::as_str),
                                                 to_state: rec.to_state.as_str(),
                                                 ts,
                                                 payload_ref: rec.payload_ref.as_ref() };
                           diesel::insert_into(journey_wal::table).values(&row)
                                                                  .returning(journey_wal::seq)
                                                                  .get_result(conn)
                                                                  .map_err(PersistenceError::from)
                       }).await?;
        debug!("wal append exec={} seq={} to={}", record.execution_id, seq, record.to_state.as_str());
        Ok(WalRecord::from_new(seq as u64, ts, record))
    }

    async fn list(&self, execution_id: &str) -> Result<Vec<WalRecord>, WalError> {
        let exec = execution_id.to_string();
        let rows: Vec<WalRow> = run_blocking(&self.provider, move |conn| {
                                    journey_wal::table.filter(journey_wal::execution_id.eq(&exec))
                                                      .order(journey_wal::seq.asc())
                                                      .load(conn)
                                                      .map_err(PersistenceError::from)
                                }).await?;
        rows.into_iter().map(WalRow::into_record).collect()
    }

    async fn execution_ids(&self) -> Result<Vec<String>, WalError> {
        self.load_ids(EXECUTION_IDS_SQL).await
    }

    async fn open_executions(&self) -> Result<Vec<String>, WalError> {
        self.load_ids(OPEN_EXECUTIONS_SQL).await
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use intent_core::ledger::{lease_deadline, ClaimOutcome, ClaimToken, IdempotencyLedger, IdempotencyRecord, LedgerEntry, LedgerError};
use intent_core::{Clock, Fingerprint, Outcome};
use log::{debug, warn};
use serde_json::Value;

use super::{db_time, run_blocking, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::idempotency_ledger::dsl as il;

const IN_FLIGHT: &str = "IN_FLIGHT";
const DONE: &str = "DONE";

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::idempotency_ledger)]
struct NewClaimRow<'a> {
    fingerprint: &'a str,
    execution_id: &'a str,
    claim_token: &'a str,
    status: &'a str,
    lease_expires_at: Option<DateTime<Utc>>,
}

#[derive(Queryable, Debug)]
struct LedgerRow {
    fingerprint: String,
    execution_id: String,
    claim_token: String,
    status: String,
    lease_expires_at: Option<DateTime<Utc>>,
    outcome: Option<Value>,
    created_at: Option<DateTime<Utc>>,
}

impl LedgerRow {
    fn into_entry(self) -> Result<LedgerEntry, PersistenceError> {
        match self.status.as_str() {
            IN_FLIGHT => {
                let lease_expires_at = self.lease_expires_at.ok_or_else(|| {
                                           PersistenceError::CorruptRow(format!("{}: in-flight without lease",
                                                                                self.fingerprint))
                                       })?;
                Ok(LedgerEntry::InFlight { execution_id: self.execution_id,
                                           claim_token: self.claim_token,
                                           lease_expires_at })
            }
            DONE => {
                let outcome = self.outcome
                                  .ok_or_else(|| PersistenceError::CorruptRow(format!("{}: done without outcome",
                                                                                      self.fingerprint)))?;
                let outcome: Outcome = serde_json::from_value(outcome)?;
                Ok(LedgerEntry::Done(IdempotencyRecord { fingerprint: Fingerprint(self.fingerprint),
                                                         execution_id: self.execution_id,
                                                         claim_token: self.claim_token,
                                                         outcome,
                                                         created_at: self.created_at.unwrap_or(DateTime::<Utc>::MIN_UTC) }))
            }
            other => Err(PersistenceError::CorruptRow(format!("{}: unknown ledger status '{other}'", self.fingerprint))),
        }
    }
}

fn load_entry(conn: &mut PgConnection, fp: &str, lock: bool) -> Result<Option<LedgerEntry>, PersistenceError> {
    let query = il::idempotency_ledger.find(fp);
    let row: Option<LedgerRow> = if lock {
        query.for_update().first(conn).optional()?
    } else {
        query.first(conn).optional()?
    };
    row.map(LedgerRow::into_entry).transpose()
}

fn claim_lost(fingerprint: &Fingerprint, owner: &ClaimToken) -> LedgerError {
    LedgerError::ClaimLost { fingerprint: fingerprint.clone(),
                             execution_id: owner.execution_id.clone() }
}

/// Ledger en Postgres. Una fila por fingerprint; el claim inicial es un
/// `INSERT .. ON CONFLICT DO NOTHING` y cualquier decisión sobre una fila
/// existente se toma bajo `SELECT .. FOR UPDATE`.
pub struct PgIdempotencyLedger<P: ConnectionProvider> {
    provider: Arc<P>,
    clock: Arc<dyn Clock>,
}

impl<P: ConnectionProvider> PgIdempotencyLedger<P> {
    pub fn new(provider: P, clock: Arc<dyn Clock>) -> Self {
        Self { provider: Arc::new(provider),
               clock }
    }
}

#[async_trait]
impl<P: ConnectionProvider> IdempotencyLedger for PgIdempotencyLedger<P> {
    async fn try_claim(&self,
                       fingerprint: &Fingerprint,
                       owner: &ClaimToken,
                       ttl: Duration)
                       -> Result<ClaimOutcome, LedgerError> {
        let now = self.clock.now();
        let deadline = db_time(lease_deadline(now, ttl));
        let fp = fingerprint.clone();
        let claimant = owner.clone();
        let outcome = run_blocking(&self.provider, move |conn| {
            conn.build_transaction().read_write().run::<_, PersistenceError, _>(|tx| {
                let row = NewClaimRow { fingerprint: fp.as_str(),
                                        execution_id: &claimant.execution_id,
                                        claim_token: &claimant.token,
                                        status: IN_FLIGHT,
                                        lease_expires_at: Some(deadline) };
                let inserted = diesel::insert_into(il::idempotency_ledger).values(row)
                                                                          .on_conflict_do_nothing()
                                                                          .execute(tx)?;
                if inserted == 1 {
                    return Ok(ClaimOutcome::Claimed { lease_expires_at: deadline });
                }
                // La fila existía; si desapareció entre el insert y el lock
                // (release concurrente) se reintenta desde cero.
                let entry = load_entry(tx, fp.as_str(), true)?.ok_or(PersistenceError::SerializationConflict)?;
                match entry {
                    LedgerEntry::Done(record) => Ok(ClaimOutcome::AlreadyDone(record)),
                    LedgerEntry::InFlight { execution_id,
                                            claim_token,
                                            lease_expires_at, } if !claimant.owns(&claim_token) && lease_expires_at > now => {
                        Ok(ClaimOutcome::AlreadyInFlight { execution_id,
                                                           lease_expires_at })
                    }
                    LedgerEntry::InFlight { execution_id,
                                            claim_token,
                                            lease_expires_at, } => {
                        if !claimant.owns(&claim_token) {
                            warn!("lease on {} held by {} expired at {}; reclaimed by {}",
                                  fp, execution_id, lease_expires_at, claimant);
                        }
                        diesel::update(il::idempotency_ledger.find(fp.as_str()))
                            .set((il::execution_id.eq(&claimant.execution_id),
                                  il::claim_token.eq(&claimant.token),
                                  il::lease_expires_at.eq(Some(deadline))))
                            .execute(tx)?;
                        Ok(ClaimOutcome::Claimed { lease_expires_at: deadline })
                    }
                }
            })
        }).await?;
        debug!("pg ledger claim fp={} owner={} -> {:?}", fingerprint, owner, outcome);
        Ok(outcome)
    }

    async fn renew(&self,
                   fingerprint: &Fingerprint,
                   owner: &ClaimToken,
                   ttl: Duration)
                   -> Result<DateTime<Utc>, LedgerError> {
        let deadline = db_time(lease_deadline(self.clock.now(), ttl));
        let fp = fingerprint.clone();
        let token = owner.token.clone();
        let updated = run_blocking(&self.provider, move |conn| {
                          diesel::update(il::idempotency_ledger.filter(il::fingerprint.eq(fp.as_str()))
                                                               .filter(il::claim_token.eq(&token))
                                                               .filter(il::status.eq(IN_FLIGHT)))
                          .set(il::lease_expires_at.eq(Some(deadline)))
                          .execute(conn)
                          .map_err(PersistenceError::from)
                      }).await?;
        if updated == 1 {
            Ok(deadline)
        } else {
            Err(claim_lost(fingerprint, owner))
        }
    }

    async fn complete(&self,
                      fingerprint: &Fingerprint,
                      owner: &ClaimToken,
                      outcome: &Outcome)
                      -> Result<IdempotencyRecord, LedgerError> {
        let outcome_json = serde_json::to_value(outcome).map_err(|e| LedgerError::Storage(format!("outcome: {e}")))?;
        let pending = IdempotencyRecord { fingerprint: fingerprint.clone(),
                                          execution_id: owner.execution_id.clone(),
                                          claim_token: owner.token.clone(),
                                          outcome: outcome.clone(),
                                          created_at: db_time(self.clock.now()) };
        let stored = run_blocking(&self.provider, move |conn| {
            conn.build_transaction().read_write().run::<_, PersistenceError, _>(|tx| {
                let updated = diesel::update(il::idempotency_ledger.filter(il::fingerprint.eq(pending.fingerprint.as_str()))
                                                                   .filter(il::claim_token.eq(&pending.claim_token))
                                                                   .filter(il::status.eq(IN_FLIGHT)))
                              .set((il::status.eq(DONE),
                                    il::execution_id.eq(&pending.execution_id),
                                    il::lease_expires_at.eq(None::<DateTime<Utc>>),
                                    il::outcome.eq(Some(outcome_json.clone())),
                                    il::created_at.eq(Some(pending.created_at))))
                              .execute(tx)?;
                if updated == 1 {
                    return Ok(Some(pending.clone()));
                }
                // Completar dos veces con el mismo dueño devuelve lo ya guardado.
                match load_entry(tx, pending.fingerprint.as_str(), false)? {
                    Some(LedgerEntry::Done(existing)) if existing.claim_token == pending.claim_token => Ok(Some(existing)),
                    _ => Ok(None),
                }
            })
        }).await?;
        match stored {
            Some(rec) => {
                debug!("pg ledger complete fp={} owner={}", fingerprint, owner);
                Ok(rec)
            }
            None => Err(claim_lost(fingerprint, owner)),
        }
    }

    async fn release(&self, fingerprint: &Fingerprint, owner: &ClaimToken) -> Result<bool, LedgerError> {
        let fp = fingerprint.clone();
        let token = owner.token.clone();
        let deleted = run_blocking(&self.provider, move |conn| {
                          diesel::delete(il::idempotency_ledger.filter(il::fingerprint.eq(fp.as_str()))
                                                               .filter(il::claim_token.eq(&token))
                                                               .filter(il::status.eq(IN_FLIGHT)))
                          .execute(conn)
                          .map_err(PersistenceError::from)
                      }).await?;
        if deleted == 1 {
            debug!("pg ledger release fp={} owner={}", fingerprint, owner);
        }
        Ok(deleted == 1)
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<LedgerEntry>, LedgerError> {
        let fp = fingerprint.clone();
        Ok(run_blocking(&self.provider, move |conn| load_entry(conn, fp.as_str(), false)).await?)
    }
}

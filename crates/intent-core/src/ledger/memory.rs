use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::lease_deadline;
use super::{ClaimOutcome, ClaimToken, IdempotencyLedger, IdempotencyRecord, LedgerEntry, LedgerError};
use crate::clock::Clock;
use crate::model::{Fingerprint, Outcome};

/// Ledger en memoria. Cada operación toma el mutex una sola vez, así que
/// claim/complete/release son atómicos entre sí.
#[derive(Debug)]
pub struct InMemoryLedger {
    entries: Mutex<HashMap<Fingerprint, LedgerEntry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()),
               clock }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, LedgerEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn claim_lost(fingerprint: &Fingerprint, owner: &ClaimToken) -> LedgerError {
    LedgerError::ClaimLost { fingerprint: fingerprint.clone(),
                             execution_id: owner.execution_id.clone() }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn try_claim(&self,
                       fingerprint: &Fingerprint,
                       owner: &ClaimToken,
                       ttl: Duration)
                       -> Result<ClaimOutcome, LedgerError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get(fingerprint) {
            Some(LedgerEntry::Done(record)) => return Ok(ClaimOutcome::AlreadyDone(record.clone())),
            Some(LedgerEntry::InFlight { execution_id,
                                         claim_token,
                                         lease_expires_at, }) if !owner.owns(claim_token) => {
                if *lease_expires_at > now {
                    return Ok(ClaimOutcome::AlreadyInFlight { execution_id: execution_id.clone(),
                                                              lease_expires_at: *lease_expires_at });
                }
                log::warn!("lease on {} held by {} expired at {}; reclaimed by {}",
                           fingerprint,
                           execution_id,
                           lease_expires_at,
                           owner);
            }
            _ => {}
        }
        let lease_expires_at = lease_deadline(now, ttl);
        entries.insert(fingerprint.clone(),
                       LedgerEntry::InFlight { execution_id: owner.execution_id.clone(),
                                               claim_token: owner.token.clone(),
                                               lease_expires_at });
        log::debug!("ledger claim fp={} owner={} until={}", fingerprint, owner, lease_expires_at);
        Ok(ClaimOutcome::Claimed { lease_expires_at })
    }

    async fn renew(&self,
                   fingerprint: &Fingerprint,
                   owner: &ClaimToken,
                   ttl: Duration)
                   -> Result<DateTime<Utc>, LedgerError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get_mut(fingerprint) {
            Some(LedgerEntry::InFlight { claim_token,
                                         lease_expires_at,
                                         .. }) if owner.owns(claim_token) => {
                *lease_expires_at = lease_deadline(now, ttl);
                Ok(*lease_expires_at)
            }
            _ => Err(claim_lost(fingerprint, owner)),
        }
    }

    async fn complete(&self,
                      fingerprint: &Fingerprint,
                      owner: &ClaimToken,
                      outcome: &Outcome)
                      -> Result<IdempotencyRecord, LedgerError> {
        let mut entries = self.lock();
        match entries.get(fingerprint) {
            Some(LedgerEntry::InFlight { claim_token, .. }) if owner.owns(claim_token) => {}
            Some(LedgerEntry::Done(record)) if owner.owns(&record.claim_token) => return Ok(record.clone()),
            _ => return Err(claim_lost(fingerprint, owner)),
        }
        let record = IdempotencyRecord { fingerprint: fingerprint.clone(),
                                         execution_id: owner.execution_id.clone(),
                                         claim_token: owner.token.clone(),
                                         outcome: outcome.clone(),
                                         created_at: self.clock.now() };
        entries.insert(fingerprint.clone(), LedgerEntry::Done(record.clone()));
        log::debug!("ledger complete fp={} owner={}", fingerprint, owner);
        Ok(record)
    }

    async fn release(&self, fingerprint: &Fingerprint, owner: &ClaimToken) -> Result<bool, LedgerError> {
        let mut entries = self.lock();
        let owned = matches!(entries.get(fingerprint),
                             Some(LedgerEntry::InFlight { claim_token, .. }) if owner.owns(claim_token));
        if owned {
            entries.remove(fingerprint);
            log::debug!("ledger release fp={} owner={}", fingerprint, owner);
        }
        Ok(owned)
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.lock().get(fingerprint).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint(s.to_string())
    }

    fn outcome(exec: &str) -> Outcome {
        Outcome { execution_id: exec.to_string(),
                  artifacts: vec![],
                  events: vec![] }
    }

    fn owner(exec: &str) -> ClaimToken {
        ClaimToken::with_token(exec, format!("{exec}-token"))
    }

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn second_claim_sees_in_flight_then_done() {
        let clock = Arc::new(ManualClock::default());
        let ledger = InMemoryLedger::new(clock.clone());
        assert!(matches!(ledger.try_claim(&fp("f"), &owner("e1"), TTL).await.unwrap(), ClaimOutcome::Claimed { .. }));
        match ledger.try_claim(&fp("f"), &owner("e2"), TTL).await.unwrap() {
            ClaimOutcome::AlreadyInFlight { execution_id, .. } => assert_eq!(execution_id, "e1"),
            other => panic!("unexpected {other:?}"),
        }
        ledger.complete(&fp("f"), &owner("e1"), &outcome("e1")).await.unwrap();
        match ledger.try_claim(&fp("f"), &owner("e3"), TTL).await.unwrap() {
            ClaimOutcome::AlreadyDone(rec) => assert_eq!(rec.outcome, outcome("e1")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_and_late_completion_is_fenced() {
        let clock = Arc::new(ManualClock::default());
        let ledger = InMemoryLedger::new(clock.clone());
        ledger.try_claim(&fp("f"), &owner("old"), TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(11));

        assert!(matches!(ledger.try_claim(&fp("f"), &owner("new"), TTL).await.unwrap(), ClaimOutcome::Claimed { .. }));
        assert!(matches!(ledger.renew(&fp("f"), &owner("old"), TTL).await, Err(LedgerError::ClaimLost { .. })));
        assert!(!ledger.release(&fp("f"), &owner("old")).await.unwrap());

        ledger.complete(&fp("f"), &owner("new"), &outcome("new")).await.unwrap();
        let late = ledger.complete(&fp("f"), &owner("old"), &outcome("old")).await;
        assert!(matches!(late, Err(LedgerError::ClaimLost { .. })));
        match ledger.lookup(&fp("f")).await.unwrap() {
            Some(LedgerEntry::Done(rec)) => assert_eq!(rec.execution_id, "new"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn release_allows_retry() {
        let ledger = InMemoryLedger::new(Arc::new(ManualClock::default()));
        ledger.try_claim(&fp("f"), &owner("e1"), TTL).await.unwrap();
        assert!(ledger.release(&fp("f"), &owner("e1")).await.unwrap());
        assert!(ledger.lookup(&fp("f")).await.unwrap().is_none());
        assert!(matches!(ledger.try_claim(&fp("f"), &owner("e2"), TTL).await.unwrap(), ClaimOutcome::Claimed { .. }));
    }

    #[tokio::test]
    async fn renew_extends_lease() {
        let clock = Arc::new(ManualClock::default());
        let ledger = InMemoryLedger::new(clock.clone());
        ledger.try_claim(&fp("f"), &owner("e1"), TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(8));
        ledger.renew(&fp("f"), &owner("e1"), TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(8));
        assert!(matches!(ledger.try_claim(&fp("f"), &owner("e2"), TTL).await.unwrap(),
                         ClaimOutcome::AlreadyInFlight { .. }));
    }

    #[tokio::test]
    async fn same_execution_with_another_token_is_in_flight() {
        let clock = Arc::new(ManualClock::default());
        let ledger = InMemoryLedger::new(clock.clone());
        let first = ClaimToken::with_token("e1", "a");
        let second = ClaimToken::with_token("e1", "b");
        assert!(matches!(ledger.try_claim(&fp("f"), &first, TTL).await.unwrap(), ClaimOutcome::Claimed { .. }));
        match ledger.try_claim(&fp("f"), &second, TTL).await.unwrap() {
            ClaimOutcome::AlreadyInFlight { execution_id, .. } => assert_eq!(execution_id, "e1"),
            other => panic!("unexpected {other:?}"),
        }
        // el mismo token vuelve a reclamar (renueva)
        assert!(matches!(ledger.try_claim(&fp("f"), &first, TTL).await.unwrap(), ClaimOutcome::Claimed { .. }));
        assert!(matches!(ledger.renew(&fp("f"), &second, TTL).await, Err(LedgerError::ClaimLost { .. })));
        assert!(!ledger.release(&fp("f"), &second).await.unwrap());
        assert!(ledger.complete(&fp("f"), &second, &outcome("e1")).await.is_err());

        ledger.complete(&fp("f"), &first, &outcome("e1")).await.unwrap();
        // completar de nuevo con el mismo dueño es idempotente; otro token no
        assert!(ledger.complete(&fp("f"), &first, &outcome("e1")).await.is_ok());
        assert!(ledger.complete(&fp("f"), &second, &outcome("e1")).await.is_err());
    }
}

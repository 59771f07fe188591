use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ClaimOutcome, ClaimToken, IdempotencyRecord, LedgerEntry, LedgerError};
use crate::model::{Fingerprint, Outcome};

/// Ledger de idempotencia: fingerprint -> claim en curso o resultado final.
///
/// Todas las escrituras posteriores al claim (`renew`, `complete`,
/// `release`) están cercadas por el token del dueño: un dueño que perdió su
/// lease nunca pisa el trabajo de quien lo reclamó, aunque ambos compartan
/// `execution_id`.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Reclama el fingerprint. Un claim con lease vencido se considera
    /// abandonado y se reasigna. Reclamar con el mismo token renueva el
    /// lease; con otro token y lease vigente devuelve `AlreadyInFlight`.
    async fn try_claim(&self,
                       fingerprint: &Fingerprint,
                       owner: &ClaimToken,
                       ttl: Duration)
                       -> Result<ClaimOutcome, LedgerError>;

    /// Extiende el lease. `ClaimLost` si ya no es dueño.
    async fn renew(&self,
                   fingerprint: &Fingerprint,
                   owner: &ClaimToken,
                   ttl: Duration)
                   -> Result<DateTime<Utc>, LedgerError>;

    /// Finaliza el claim con el outcome. Idempotente para el mismo dueño.
    async fn complete(&self,
                      fingerprint: &Fingerprint,
                      owner: &ClaimToken,
                      outcome: &Outcome)
                      -> Result<IdempotencyRecord, LedgerError>;

    /// Elimina el claim provisional para permitir reintentos. Devuelve
    /// `false` si no había nada que liberar para ese dueño.
    async fn release(&self, fingerprint: &Fingerprint, owner: &ClaimToken) -> Result<bool, LedgerError>;

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<LedgerEntry>, LedgerError>;
}

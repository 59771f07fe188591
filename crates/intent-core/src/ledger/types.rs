use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::errors::IntentError;
use crate::model::{Fingerprint, Outcome};

/// Dueño de un claim: la ejecución más un token propio de cada llamada a
/// `execute`. Dos llamadas con el mismo contexto son dueños distintos.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimToken {
    pub execution_id: String,
    pub token: String,
}

impl ClaimToken {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self { execution_id: execution_id.into(),
               token: Uuid::new_v4().simple().to_string() }
    }

    /// Token fijo, para tests y herramientas.
    pub fn with_token(execution_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self { execution_id: execution_id.into(),
               token: token.into() }
    }

    pub fn owns(&self, claim_token: &str) -> bool {
        self.token == claim_token
    }
}

impl std::fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.execution_id, self.token)
    }
}

/// Registro final de una ejecución completada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub fingerprint: Fingerprint,
    pub execution_id: String,
    /// Token del claim que completó.
    #[serde(default)]
    pub claim_token: String,
    pub outcome: Outcome,
    pub created_at: DateTime<Utc>,
}

/// Estado actual de un fingerprint en el ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    InFlight {
        execution_id: String,
        claim_token: String,
        lease_expires_at: DateTime<Utc>,
    },
    Done(IdempotencyRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// El llamador es dueño del fingerprint hasta `lease_expires_at` (o hasta
    /// renovar).
    Claimed { lease_expires_at: DateTime<Utc> },
    AlreadyInFlight {
        execution_id: String,
        lease_expires_at: DateTime<Utc>,
    },
    AlreadyDone(IdempotencyRecord),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// El claim expiró y otro llamador lo tomó (o ya completó).
    #[error("claim on {fingerprint} no longer owned by {execution_id}")]
    ClaimLost {
        fingerprint: Fingerprint,
        execution_id: String,
    },
    #[error("ledger storage: {0}")]
    Storage(String),
}

impl From<LedgerError> for IntentError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::ClaimLost { .. } => IntentError::Conflict(e.to_string()),
            LedgerError::Storage(msg) => IntentError::Storage(msg),
        }
    }
}

/// `now + ttl`, saturando en lugar de desbordar.
pub fn lease_deadline(now: DateTime<Utc>, ttl: std::time::Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::milliseconds(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 1_000));
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

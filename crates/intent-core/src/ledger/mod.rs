//! Ledger de idempotencia con leases.

pub mod memory;
pub mod store;
pub mod types;

pub use memory::InMemoryLedger;
pub use store::IdempotencyLedger;
pub use types::{lease_deadline, ClaimOutcome, ClaimToken, IdempotencyRecord, LedgerEntry, LedgerError};

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;

use super::{NewWalRecord, WalError, WalRecord};

/// Log append-only de transiciones de journey.
///
/// Los registros de un mismo `execution_id` se devuelven en orden de append
/// (`seq` creciente). Entre ejecuciones distintas no hay orden garantizado.
#[async_trait]
pub trait WalStore: Send + Sync {
    /// Persiste el registro antes de devolver (durable al retornar `Ok`).
    async fn append(&self, record: NewWalRecord) -> Result<WalRecord, WalError>;

    async fn list(&self, execution_id: &str) -> Result<Vec<WalRecord>, WalError>;

    /// Todos los `execution_id` presentes, en orden de primera aparición.
    async fn execution_ids(&self) -> Result<Vec<String>, WalError>;

    /// Ejecuciones sin registro terminal de journey.
    async fn open_executions(&self) -> Result<Vec<String>, WalError> {
        let mut open = Vec::new();
        for id in self.execution_ids().await? {
            let records = self.list(&id).await?;
            if !records.iter().any(WalRecord::is_terminal) {
                open.push(id);
            }
        }
        Ok(open)
    }
}

/// Ids de ejecución en orden de primera aparición dentro de `records`.
pub fn distinct_executions<'a, I>(records: I) -> Vec<String>
    where I: IntoIterator<Item = &'a WalRecord>
{
    let mut seen = HashSet::new();
    records.into_iter()
           .filter(|r| seen.insert(r.execution_id.as_str()))
           .map(|r| r.execution_id.clone())
           .collect()
}

/// Ejecuciones abiertas calculadas sobre un slice completo del log.
pub fn open_in(records: &[WalRecord]) -> Vec<String> {
    let closed: BTreeSet<&str> = records.iter()
                                        .filter(|r| r.is_terminal())
                                        .map(|r| r.execution_id.as_str())
                                        .collect();
    distinct_executions(records).into_iter()
                                .filter(|id| !closed.contains(id.as_str()))
                                .collect()
}

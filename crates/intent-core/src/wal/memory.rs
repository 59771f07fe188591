use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::store::{distinct_executions, open_in};
use super::{NewWalRecord, WalError, WalRecord, WalStore};
use crate::clock::Clock;

#[derive(Debug)]
pub struct InMemoryWal {
    records: Mutex<Vec<WalRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryWal {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { records: Mutex::new(Vec::new()),
               clock }
    }

    /// Copia completa del log (tests / inspección).
    pub fn snapshot(&self) -> Vec<WalRecord> {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl WalStore for InMemoryWal {
    async fn append(&self, record: NewWalRecord) -> Result<WalRecord, WalError> {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let rec = WalRecord::from_new(records.len() as u64, self.clock.now(), record);
        log::debug!("wal append seq={} exec={} step={:?} {:?}->{:?}",
                    rec.seq,
                    rec.execution_id,
                    rec.step_name,
                    rec.from_state,
                    rec.to_state);
        records.push(rec.clone());
        Ok(rec)
    }

    async fn list(&self, execution_id: &str) -> Result<Vec<WalRecord>, WalError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records.iter().filter(|r| r.execution_id == execution_id).cloned().collect())
    }

    async fn execution_ids(&self) -> Result<Vec<String>, WalError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(distinct_executions(records.iter()))
    }

    async fn open_executions(&self) -> Result<Vec<String>, WalError> {
        Ok(open_in(&self.records.lock().unwrap_or_else(|p| p.into_inner())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::wal::{JourneyStatus, StepState};

    #[tokio::test]
    async fn terminal_journey_record_closes_execution() {
        let wal = InMemoryWal::new(Arc::new(SystemClock));
        wal.append(NewWalRecord::journey("j1", None, JourneyStatus::Running)).await.unwrap();
        wal.append(NewWalRecord::journey("j2", None, JourneyStatus::Running)).await.unwrap();
        wal.append(NewWalRecord::step("j1", "a", StepState::Pending, StepState::Running)).await.unwrap();
        // un step FAILED no cierra la journey
        wal.append(NewWalRecord::step("j2", "a", StepState::Running, StepState::Failed)).await.unwrap();
        wal.append(NewWalRecord::journey("j1", Some(JourneyStatus::Running), JourneyStatus::Completed))
           .await
           .unwrap();

        assert_eq!(wal.open_executions().await.unwrap(), vec!["j2".to_string()]);
        let j1 = wal.list("j1").await.unwrap();
        assert_eq!(j1.len(), 3);
        assert!(j1.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(wal.execution_ids().await.unwrap(), vec!["j1".to_string(), "j2".to_string()]);
    }

    #[test]
    fn sequence_numbers_are_global_across_executions() {
        let wal = InMemoryWal::new(Arc::new(SystemClock));
        let seqs: Vec<u64> = ["a", "b", "a"].iter()
                                            .map(|exec| {
                                                let rec = NewWalRecord::journey(*exec, None, JourneyStatus::Running);
                                                tokio_test::block_on(wal.append(rec)).unwrap().seq
                                            })
                                            .collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tokio_test::block_on(wal.list("a")).unwrap().len(), 2);
    }
}

//! WAL en archivo JSON-lines.
//!
//! Un registro por línea, `fsync` de datos en cada append. Al abrir se
//! re-lee el archivo completo como bytes: una última línea incompleta o
//! indecodificable (crash a mitad de escritura, aun cortando un carácter
//! multibyte) se descarta y se trunca; cualquier otra línea ilegible es
//! corrupción y la apertura falla. Un append que falla a medias se deshace
//! truncando al largo confirmado anterior.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::store::{distinct_executions, open_in};
use super::{NewWalRecord, WalError, WalRecord, WalStore};
use crate::clock::Clock;

/// Lo mínimo que el WAL necesita del archivo subyacente.
trait LogFile: Write {
    fn sync(&mut self) -> io::Result<()>;
    /// Recorta a `len` y deja el cursor al final.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

/// Escribe una línea completa o ninguna: ante error vuelve a `committed`.
fn append_line(file: &mut impl LogFile, committed: u64, line: &[u8]) -> io::Result<u64> {
    let written = file.write_all(line).and_then(|_| file.sync());
    match written {
        Ok(()) => Ok(committed + line.len() as u64),
        Err(e) => {
            if let Err(undo) = file.truncate_to(committed) {
                log::error!("wal rollback to {committed} bytes failed: {undo}");
            }
            Err(e)
        }
    }
}

struct FileWalInner {
    file: File,
    /// Bytes confirmados (todas líneas completas).
    len: u64,
    records: Vec<WalRecord>,
}

pub struct FileWal {
    path: PathBuf,
    inner: Arc<Mutex<FileWalInner>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FileWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWal").field("path", &self.path).finish()
    }
}

impl FileWal {
    /// Abre (o crea) el log en `path` y reconstruye su contenido.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().read(true).append(true).create(true).open(&path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let (records, valid_len) = parse_log(&buf)?;
        if valid_len < buf.len() {
            log::warn!("wal {}: discarding torn trailing record ({} bytes)",
                       path.display(),
                       buf.len() - valid_len);
            file.set_len(valid_len as u64)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::End(0))?;
        log::debug!("wal {} opened with {} records", path.display(), records.len());
        Ok(Self { path,
                  inner: Arc::new(Mutex::new(FileWalInner { file,
                                                            len: valid_len as u64,
                                                            records })),
                  clock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_records<T>(&self, f: impl FnOnce(&[WalRecord]) -> T) -> T {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f(&guard.records)
    }
}

/// Devuelve los registros válidos y la longitud en bytes que ocupan.
fn parse_log(buf: &[u8]) -> Result<(Vec<WalRecord>, usize), WalError> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut lines = buf.split_inclusive(|b| *b == b'\n').enumerate().peekable();
    while let Some((idx, raw)) = lines.next() {
        let is_last = lines.peek().is_none();
        let complete = raw.ends_with(b"\n");
        if raw.iter().all(u8::is_ascii_whitespace) {
            offset += raw.len();
            continue;
        }
        match serde_json::from_slice::<WalRecord>(raw) {
            Ok(rec) if complete => {
                records.push(rec);
                offset += raw.len();
            }
            // sin '\n' final: el append no terminó
            Ok(_) => break,
            Err(_) if is_last => break,
            Err(e) => {
                return Err(WalError::Corrupt { line: idx + 1,
                                               reason: e.to_string() })
            }
        }
    }
    Ok((records, offset))
}

#[async_trait]
impl WalStore for FileWal {
    async fn append(&self, record: NewWalRecord) -> Result<WalRecord, WalError> {
        let inner = Arc::clone(&self.inner);
        let now = self.clock.now();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().unwrap_or_else(|p| p.into_inner());
            let seq = guard.records.last().map(|r| r.seq + 1).unwrap_or(0);
            let rec = WalRecord::from_new(seq, now, record);
            let mut line = serde_json::to_string(&rec).map_err(|e| WalError::Storage(e.to_string()))?;
            line.push('\n');
            let committed = guard.len;
            guard.len = append_line(&mut guard.file, committed, line.as_bytes())?;
            log::debug!("wal append seq={} exec={} step={:?} {:?}->{:?}",
                        rec.seq,
                        rec.execution_id,
                        rec.step_name,
                        rec.from_state,
                        rec.to_state);
            guard.records.push(rec.clone());
            Ok(rec)
        }).await
          .map_err(|e| WalError::Storage(format!("wal append task: {e}")))?
    }

    async fn list(&self, execution_id: &str) -> Result<Vec<WalRecord>, WalError> {
        Ok(self.with_records(|all| all.iter().filter(|r| r.execution_id == execution_id).cloned().collect()))
    }

    async fn execution_ids(&self) -> Result<Vec<String>, WalError> {
        Ok(self.with_records(|all| distinct_executions(all)))
    }

    async fn open_executions(&self) -> Result<Vec<String>, WalError> {
        Ok(self.with_records(open_in))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::wal::{JourneyStatus, StepState};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }

    #[tokio::test]
    async fn reopen_replays_appended_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal").join("journeys.jsonl");
        {
            let wal = FileWal::open(&path, clock()).unwrap();
            wal.append(NewWalRecord::journey("j1", None, JourneyStatus::Running)).await.unwrap();
            wal.append(NewWalRecord::step("j1", "a", StepState::Pending, StepState::Running)).await.unwrap();
        }
        let wal = FileWal::open(&path, clock()).unwrap();
        let recs = wal.list("j1").await.unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].step_name.as_deref(), Some("a"));
        let next = wal.append(NewWalRecord::step("j1", "a", StepState::Running, StepState::Done)).await.unwrap();
        assert_eq!(next.seq, 2);
        assert_eq!(wal.open_executions().await.unwrap(), vec!["j1".to_string()]);
    }

    #[tokio::test]
    async fn torn_trailing_line_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.jsonl");
        {
            let wal = FileWal::open(&path, clock()).unwrap();
            wal.append(NewWalRecord::journey("j1", None, JourneyStatus::Running)).await.unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"seq\":1,\"execution_id\":\"j1\",\"st").unwrap();
        }
        let wal = FileWal::open(&path, clock()).unwrap();
        assert_eq!(wal.list("j1").await.unwrap().len(), 1);
        wal.append(NewWalRecord::step("j1", "a", StepState::Pending, StepState::Running)).await.unwrap();
        drop(wal);

        let wal = FileWal::open(&path, clock()).unwrap();
        assert_eq!(wal.list("j1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn torn_multibyte_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.jsonl");
        {
            let wal = FileWal::open(&path, clock()).unwrap();
            wal.append(NewWalRecord::step("j1", "reseña", StepState::Pending, StepState::Running)).await.unwrap();
        }
        {
            // corte dentro de la 'ñ' (0xC3 0xB1): el archivo deja de ser UTF-8 válido
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"seq\":1,\"execution_id\":\"j1\",\"step_name\":\"rese\xC3").unwrap();
        }
        let wal = FileWal::open(&path, clock()).unwrap();
        let recs = wal.list("j1").await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].step_name.as_deref(), Some("reseña"));
        let next = wal.append(NewWalRecord::step("j1", "reseña", StepState::Running, StepState::Done)).await.unwrap();
        assert_eq!(next.seq, 1);
        drop(wal);

        let raw = std::fs::read(&path).unwrap();
        assert!(std::str::from_utf8(&raw).is_ok());
        assert_eq!(FileWal::open(&path, clock()).unwrap().list("j1").await.unwrap().len(), 2);
    }

    #[test]
    fn invalid_utf8_in_middle_line_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.jsonl");
        std::fs::write(&path, b"{\"seq\":0,\"x\":\"\xFF\"}\n{}\n").unwrap();
        let err = FileWal::open(&path, clock()).unwrap_err();
        assert!(matches!(err, WalError::Corrupt { line: 1, .. }));
    }

    /// Archivo en memoria que acepta `budget` bytes y luego falla.
    struct ShortDisk {
        bytes: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.bytes.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for ShortDisk {
        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.bytes.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_append_leaves_no_partial_line() {
        let first = b"{\"seq\":0}\n";
        let mut disk = ShortDisk { bytes: Vec::new(),
                                   budget: first.len() + 4 };
        let committed = append_line(&mut disk, 0, first).unwrap();
        assert_eq!(committed, first.len() as u64);

        let err = append_line(&mut disk, committed, b"{\"seq\":1}\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(disk.bytes, first);

        // con espacio de nuevo, el siguiente append queda pegado al anterior
        disk.budget = 64;
        let committed = append_line(&mut disk, committed, b"{\"seq\":1}\n").unwrap();
        assert_eq!(disk.bytes, b"{\"seq\":0}\n{\"seq\":1}\n");
        assert_eq!(committed, disk.bytes.len() as u64);
    }

    #[test]
    fn corrupt_middle_line_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.jsonl");
        std::fs::write(&path, "not json\n{}\n").unwrap();
        let err = FileWal::open(&path, clock()).unwrap_err();
        assert!(matches!(err, WalError::Corrupt { line: 1, .. }));
    }
}

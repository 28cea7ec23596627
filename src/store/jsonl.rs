use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

use crate::core::{StatusReport, StoredReport};
use crate::error::StoreError;
use crate::store::ReportStore;

/// File-backed store: one JSON object per line, append-only.
///
/// The sequence number of a report is the zero-based index of its line.
/// Appends hold an exclusive advisory lock on the log file, so writers in
/// other processes are serialized too and returned seqs match line indexes.
/// A trailing line without a terminating newline is an append still in flight
/// and is left out of snapshots. Once the lock is held, such a line can only
/// be left over from a writer that died, and it is cut off before appending.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    tail: Mutex<TailState>,
}

/// What this handle last saw at the end of the log: its length and line count.
/// `bytes` always ends on a newline.
#[derive(Debug, Default)]
struct TailState {
    bytes: u64,
    lines: u64,
}

impl JsonlStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tail: Mutex::new(TailState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> StoreError {
        StoreError::unavailable(self.location(), reason)
    }

    fn read_log(&self) -> Result<Vec<u8>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(self.unavailable(err)),
        }
    }

    /// Brings `tail` up to date with the locked log file and drops a dead
    /// partial line at its end. Reuses the cached count when nobody else has
    /// touched the file since our last append.
    fn sync_tail(&self, file: &File, tail: &mut TailState) -> Result<(), StoreError> {
        let len = file.metadata().map_err(|err| self.unavailable(err))?.len();
        if len == tail.bytes {
            return Ok(());
        }

        let bytes = self.read_log()?;
        let complete = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |end| end + 1);
        if complete < bytes.len() {
            file.set_len(complete as u64)
                .map_err(|err| self.unavailable(err))?;
        }
        tail.bytes = complete as u64;
        tail.lines = bytes[..complete].iter().filter(|b| **b == b'\n').count() as u64;
        Ok(())
    }
}

impl ReportStore for JsonlStore {
    fn append(&self, report: StatusReport) -> Result<u64, StoreError> {
        let mut line = serde_json::to_vec(&report).map_err(|err| self.unavailable(err))?;
        line.push(b'\n');

        let mut tail = self
            .tail
            .lock()
            .map_err(|_| self.unavailable("append lock poisoned"))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| self.unavailable(err))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.unavailable(err))?;
        // Released when `file` is dropped.
        FileExt::lock_exclusive(&file).map_err(|err| self.unavailable(err))?;

        self.sync_tail(&file, &mut tail)?;
        let seq = tail.lines;

        // Single write so concurrent appenders never interleave inside a line.
        file.write_all(&line).map_err(|err| self.unavailable(err))?;
        file.sync_data().map_err(|err| self.unavailable(err))?;

        tail.bytes = tail.bytes.saturating_add(line.len() as u64);
        tail.lines = seq + 1;
        Ok(seq)
    }

    fn snapshot(&self) -> Result<Vec<StoredReport>, StoreError> {
        let bytes = self.read_log()?;
        let complete = match bytes.iter().rposition(|b| *b == b'\n') {
            Some(end) => &bytes[..end],
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        for (idx, line) in complete.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let report: StatusReport =
                serde_json::from_slice(line).map_err(|err| StoreError::Corrupt {
                    location: self.location(),
                    line: idx + 1,
                    reason: err.to_string(),
                })?;
            out.push(StoredReport {
                seq: idx as u64,
                report,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use time::macros::datetime;

    fn temp_dir(tag: &str) -> PathBuf {
        static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

        let seq = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "fleetstat-jsonl-{tag}-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create dir");
        dir
    }

    fn report(id: &str, av: bool) -> StatusReport {
        StatusReport {
            machine_id: id.to_string(),
            os: Some("macOS".to_string()),
            disk_encrypted: true,
            os_up_to_date: true,
            antivirus_enabled: av,
            sleep_setting_ok: true,
            timestamp: datetime!(2024-03-01 12:30:00 UTC),
        }
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let dir = temp_dir("missing");
        let store = JsonlStore::open(dir.join("nope/reports.jsonl"));
        assert!(store.snapshot().expect("snapshot").is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn appends_survive_reopen_with_line_index_seqs() {
        let dir = temp_dir("reopen");
        let path = dir.join("data/reports.jsonl");

        let store = JsonlStore::open(&path);
        assert_eq!(store.append(report("a", true)).expect("append"), 0);
        assert_eq!(store.append(report("b", false)).expect("append"), 1);
        drop(store);

        let reopened = JsonlStore::open(&path);
        assert_eq!(reopened.append(report("a", false)).expect("append"), 2);

        let snap = reopened.snapshot().expect("snapshot");
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[1].report, report("b", false));
        assert_eq!(snap[2].seq, 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn seq_accounts_for_lines_written_by_another_handle() {
        let dir = temp_dir("two-handles");
        let path = dir.join("reports.jsonl");

        let first = JsonlStore::open(&path);
        let second = JsonlStore::open(&path);
        assert_eq!(first.append(report("a", true)).expect("append"), 0);
        assert_eq!(second.append(report("b", true)).expect("append"), 1);
        assert_eq!(first.append(report("c", true)).expect("append"), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn trailing_partial_line_is_not_part_of_the_snapshot() {
        let dir = temp_dir("partial");
        let path = dir.join("reports.jsonl");

        let store = JsonlStore::open(&path);
        store.append(report("a", true)).expect("append");
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        file.write_all(br#"{"machine_id":"b","os":"#)
            .expect("write partial");

        let snap = store.snapshot().expect("snapshot");
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].report.machine_id, "a");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn append_after_dead_partial_line_keeps_the_log_readable() {
        let dir = temp_dir("partial-append");
        let path = dir.join("reports.jsonl");

        let store = JsonlStore::open(&path);
        assert_eq!(store.append(report("a", true)).expect("append"), 0);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        file.write_all(br#"{"machine_id":"b","os":"#)
            .expect("write partial");
        drop(file);

        assert_eq!(store.append(report("c", false)).expect("append"), 1);

        let snap = store.snapshot().expect("snapshot");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[1].seq, 1);
        assert_eq!(snap[1].report, report("c", false));

        let fresh = JsonlStore::open(&path);
        assert_eq!(fresh.append(report("d", true)).expect("append"), 2);
        assert_eq!(fresh.snapshot().expect("snapshot").len(), 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn concurrent_appends_and_snapshots_see_whole_lines_in_order() {
        let dir = temp_dir("concurrent");
        let path = dir.join("reports.jsonl");
        let writers: Vec<JsonlStore> = (0..4).map(|_| JsonlStore::open(&path)).collect();
        let reader = JsonlStore::open(&path);

        let (mut seqs, snapshots) = std::thread::scope(|s| {
            let appenders: Vec<_> = writers
                .iter()
                .enumerate()
                .map(|(t, store)| {
                    s.spawn(move || {
                        (0..25)
                            .map(|i| {
                                store
                                    .append(report(&format!("m{t}-{i}"), i % 2 == 0))
                                    .expect("append")
                            })
                            .collect::<Vec<u64>>()
                    })
                })
                .collect();
            let reader = &reader;
            let snapper = s.spawn(move || {
                (0..20)
                    .map(|_| reader.snapshot().expect("snapshot"))
                    .collect::<Vec<_>>()
            });

            let seqs: Vec<u64> = appenders
                .into_iter()
                .flat_map(|h| h.join().expect("appender"))
                .collect();
            (seqs, snapper.join().expect("snapshotter"))
        });

        seqs.sort_unstable();
        assert_eq!(seqs, (0..100).collect::<Vec<u64>>());

        let full = reader.snapshot().expect("snapshot");
        assert_eq!(full.len(), 100);
        for (i, record) in full.iter().enumerate() {
            assert_eq!(record.seq, i as u64);
        }
        for snap in snapshots {
            assert_eq!(snap.as_slice(), &full[..snap.len()]);
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_complete_line_is_an_error_not_a_partial_result() {
        let dir = temp_dir("corrupt");
        let path = dir.join("reports.jsonl");

        let store = JsonlStore::open(&path);
        store.append(report("a", true)).expect("append");
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        file.write_all(b"not json\n").expect("write garbage");

        let err = store.snapshot().expect_err("corrupt log");
        match err {
            StoreError::Corrupt { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unreadable_path_is_unavailable() {
        let dir = temp_dir("unavailable");
        // A directory where the log file should be.
        let path = dir.join("reports.jsonl");
        std::fs::create_dir_all(&path).expect("mkdir");

        let store = JsonlStore::open(&path);
        assert!(matches!(
            store.snapshot(),
            Err(StoreError::Unavailable { .. })
        ));
        assert!(matches!(
            store.append(report("a", true)),
            Err(StoreError::Unavailable { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}

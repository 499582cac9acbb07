//! Segment-file log writer.
//!
//! Appends frames to `redo.log`. With a non-zero fsync interval a
//! background thread syncs the file periodically and fires the commit hooks
//! of every record made durable by that sync; synchronous appends sync
//! immediately and fire pending hooks on the calling thread. With a zero
//! interval every append is synchronous.

use super::reader::LogReader;
use super::rollover::RolloverManager;
use super::{LogError, LogWriter, WriterStats};
use crate::config::RedoConfig;
use crate::format::{LogSegment, SegmentHeader};
use crate::txn::{CommitHook, LogRecord};
use parking_lot::{Condvar, Mutex};
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Append one record (primary bytes plus side channel) as a frame.
pub(crate) fn write_record(segment: &mut LogSegment, record: &LogRecord) -> Result<u64, LogError> {
    let (primary, side) = record.output_stream()?;
    let written = match side {
        Some((mut reader, len)) => {
            let reader: &mut dyn Read = &mut reader;
            segment.write_frame(&primary, Some((reader, len)))?
        }
        None => segment.write_frame(&primary, None)?,
    };
    Ok(written)
}

struct WriterState {
    segment: Option<LogSegment>,
    pending_hooks: Vec<CommitHook>,
    unsynced: bool,
    opened_size: u64,
    stats: WriterStats,
}

struct Inner {
    rollover: RolloverManager,
    server_id: [u8; 16],
    fsync_interval: Duration,
    state: Mutex<WriterState>,
    shutdown_flag: AtomicBool,
    flush_signal: Arc<(Mutex<bool>, Condvar)>,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn sync_locked(state: &mut WriterState) -> Result<Vec<CommitHook>, LogError> {
        if state.unsynced {
            if let Some(segment) = state.segment.as_mut() {
                let start = Instant::now();
                segment.sync()?;
                state.stats.sync_calls += 1;
                state.stats.sync_nanos += start.elapsed().as_nanos() as u64;
            }
            state.unsynced = false;
        }
        Ok(std::mem::take(&mut state.pending_hooks))
    }

    fn flush(&self) -> Result<(), LogError> {
        let hooks = {
            let mut state = self.state.lock();
            Self::sync_locked(&mut state)?
        };
        for hook in hooks {
            hook.fire();
        }
        Ok(())
    }

    fn flush_loop(&self) {
        loop {
            let (lock, cvar) = &*self.flush_signal;
            let mut signaled = lock.lock();
            if !*signaled {
                cvar.wait_for(&mut signaled, self.fsync_interval);
            }
            *signaled = false;
            drop(signaled);

            let stopping = self.shutdown_flag.load(Ordering::SeqCst);
            if let Err(e) = self.flush() {
                tracing::error!(error = %e, "Redo log background flush failed");
            }
            if stopping {
                break;
            }
        }
    }

    fn signal_flush(&self) {
        let (lock, cvar) = &*self.flush_signal;
        let mut signaled = lock.lock();
        *signaled = true;
        cvar.notify_one();
    }

    fn stop_flusher(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.signal_flush();
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }
    }

    fn new_header(&self, sequence: u64) -> SegmentHeader {
        SegmentHeader::new(sequence, zredo_core::now_millis(), self.server_id)
    }
}

/// Log writer over segment files.
pub struct FileLogWriter {
    inner: Arc<Inner>,
}

impl FileLogWriter {
    /// Writer for the log described by `config`. Call [`LogWriter::open`]
    /// before appending.
    pub fn new(config: &RedoConfig) -> Self {
        FileLogWriter {
            inner: Arc::new(Inner {
                rollover: RolloverManager::new(config.log_path(), &config.archive_dir),
                server_id: *config.server_id.as_bytes(),
                fsync_interval: Duration::from_millis(config.fsync_interval_ms),
                state: Mutex::new(WriterState {
                    segment: None,
                    pending_hooks: Vec::new(),
                    unsynced: false,
                    opened_size: 0,
                    stats: WriterStats::default(),
                }),
                shutdown_flag: AtomicBool::new(false),
                flush_signal: Arc::new((Mutex::new(false), Condvar::new())),
                flush_thread: Mutex::new(None),
            }),
        }
    }

    /// Active segment path
    pub fn path(&self) -> PathBuf {
        self.inner.rollover.log_path().to_path_buf()
    }

    fn is_buffered(&self) -> bool {
        !self.inner.fsync_interval.is_zero()
    }

    fn start_flush_thread(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("redo-flush".to_string())
            .spawn(move || inner.flush_loop());
        match handle {
            Ok(handle) => *self.inner.flush_thread.lock() = Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "Could not start redo flush thread; appends fall back to the caller");
            }
        }
    }

    fn open_segment(&self) -> Result<LogSegment, LogError> {
        let inner = &self.inner;
        let path = inner.rollover.log_path().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::create_dir_all(inner.rollover.archive_dir())?;
        inner.rollover.repair()?;

        let next_sequence = inner
            .rollover
            .latest_archived_sequence()?
            .map(|s| s + 1)
            .unwrap_or(1);

        if !path.exists() {
            return Ok(LogSegment::create(&path, inner.new_header(next_sequence))?);
        }

        let scan = LogReader::scan(&path).map_err(|e| match e {
            super::LogReadError::Io(io) => LogError::Io(io),
            _ => LogError::Corrupt {
                path: path.clone(),
                offset: 0,
            },
        })?;
        if let Some(offset) = scan.corrupt_at {
            return Err(LogError::Corrupt { path, offset });
        }

        match LogSegment::open_append(&path)? {
            Some(mut segment) => {
                if scan.valid_end < scan.file_len {
                    tracing::warn!(
                        path = ?path,
                        valid_end = scan.valid_end,
                        dropped = scan.file_len - scan.valid_end,
                        "Truncating torn tail of redo log"
                    );
                    segment.truncate(scan.valid_end)?;
                }
                Ok(segment)
            }
            None => {
                tracing::warn!(path = ?path, "Redo log header incomplete, recreating segment");
                std::fs::remove_file(&path)?;
                Ok(LogSegment::create(&path, inner.new_header(next_sequence))?)
            }
        }
    }
}

impl LogWriter for FileLogWriter {
    fn open(&self) -> Result<(), LogError> {
        {
            let mut state = self.inner.state.lock();
            if state.segment.is_some() {
                return Ok(());
            }
            let segment = self.open_segment()?;
            tracing::info!(
                path = ?segment.path(),
                sequence = segment.sequence(),
                size = segment.size(),
                "Opened redo log"
            );
            state.opened_size = segment.size();
            state.segment = Some(segment);
        }
        self.inner.shutdown_flag.store(false, Ordering::SeqCst);
        if self.is_buffered() {
            self.start_flush_thread();
        }
        Ok(())
    }

    fn close(&self) -> Result<(), LogError> {
        self.inner.stop_flusher();
        let hooks = {
            let mut state = self.inner.state.lock();
            let hooks = Inner::sync_locked(&mut state)?;
            if let Some(mut segment) = state.segment.take() {
                segment.close()?;
            }
            hooks
        };
        for hook in hooks {
            hook.fire();
        }
        Ok(())
    }

    fn log(&self, record: &LogRecord, sync: bool) -> Result<(), LogError> {
        let hooks = {
            let mut state = self.inner.state.lock();
            let segment = state.segment.as_mut().ok_or(LogError::Closed)?;
            let written = write_record(segment, record)?;
            state.stats.appends += 1;
            state.stats.bytes_written += written;
            state.unsynced = true;
            state.pending_hooks.extend(record.take_hooks());

            if sync || !self.is_buffered() {
                Inner::sync_locked(&mut state)?
            } else {
                Vec::new()
            }
        };
        for hook in hooks {
            hook.fire();
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), LogError> {
        self.inner.flush()
    }

    fn size(&self) -> u64 {
        self.inner
            .state
            .lock()
            .segment
            .as_ref()
            .map(|s| s.size())
            .unwrap_or(0)
    }

    fn opened_size(&self) -> u64 {
        self.inner.state.lock().opened_size
    }

    fn create_time(&self) -> i64 {
        self.inner
            .state
            .lock()
            .segment
            .as_ref()
            .map(|s| s.header().create_time)
            .unwrap_or(0)
    }

    fn sequence(&self) -> u64 {
        self.inner
            .state
            .lock()
            .segment
            .as_ref()
            .map(|s| s.sequence())
            .unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.inner
            .state
            .lock()
            .segment
            .as_ref()
            .map(|s| s.is_empty())
            .unwrap_or(true)
    }

    fn rollover(&self, carry: &[Arc<LogRecord>]) -> Result<Option<PathBuf>, LogError> {
        let inner = &self.inner;
        let (archived, hooks) = {
            let mut state = inner.state.lock();
            let hooks = Inner::sync_locked(&mut state)?;
            let sequence = match state.segment.as_ref() {
                Some(segment) => segment.sequence(),
                None => return Err(LogError::Closed),
            };

            let tmp = inner.rollover.temp_path();
            if tmp.exists() {
                std::fs::remove_file(&tmp)?;
            }
            let mut next = LogSegment::create(&tmp, inner.new_header(sequence + 1))?;
            for record in carry {
                write_record(&mut next, record)?;
            }
            next.close()?;
            drop(next);

            if let Some(mut old) = state.segment.take() {
                old.close()?;
            }
            let log_path = inner.rollover.log_path().to_path_buf();
            let archived = inner.rollover.archive_path(sequence);
            std::fs::rename(&log_path, &archived)?;
            std::fs::rename(&tmp, &log_path)?;

            let segment = LogSegment::open_append(&log_path)?.ok_or(LogError::Corrupt {
                path: log_path.clone(),
                offset: 0,
            })?;
            state.opened_size = segment.size();
            state.segment = Some(segment);
            state.stats.rollovers += 1;
            tracing::info!(
                archived = ?archived,
                sequence = sequence + 1,
                carried = carry.len(),
                "Rolled over redo log"
            );
            (archived, hooks)
        };
        for hook in hooks {
            hook.fire();
        }
        Ok(Some(archived))
    }

    fn stats(&self) -> WriterStats {
        self.inner.state.lock().stats.clone()
    }
}

impl Drop for FileLogWriter {
    fn drop(&mut self) {
        self.inner.stop_flusher();
        let mut state = self.inner.state.lock();
        if let Some(segment) = state.segment.as_mut() {
            let _ = segment.sync();
        }
    }
}

impl std::fmt::Debug for FileLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLogWriter")
            .field("path", &self.inner.rollover.log_path())
            .field("fsync_interval", &self.inner.fsync_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SEGMENT_HEADER_SIZE;
    use crate::testing::{note_registry, NoteOp, RecordingLog};
    use crate::txn::CommitInfo;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;
    use zredo_core::{MailboxId, TransactionId};

    fn note(log: &RecordingLog, text: &str) -> Arc<LogRecord> {
        let mut rec = LogRecord::new(Box::new(NoteOp::new(text)));
        rec.start(log, 1);
        Arc::new(rec)
    }

    fn read_texts(path: &std::path::Path) -> Vec<String> {
        let registry = note_registry();
        let (entries, _) = LogReader::open(path, &registry).unwrap().read_all().unwrap();
        entries
            .iter()
            .filter_map(|e| e.record.op_as::<NoteOp>().map(|n| n.text.clone()))
            .collect()
    }

    fn hook(counter: &Arc<AtomicUsize>) -> CommitHook {
        let counter = Arc::clone(counter);
        CommitHook::new(
            CommitInfo {
                txn_id: TransactionId::new(1, 1),
                opcode: NoteOp::OPCODE,
                mailbox_id: MailboxId(1),
                timestamp: 0,
            },
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_open_creates_segment() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path());
        let writer = FileLogWriter::new(&config);
        writer.open().unwrap();
        assert!(config.log_path().exists());
        assert!(writer.is_empty());
        assert_eq!(writer.sequence(), 1);
        assert_eq!(writer.size(), SEGMENT_HEADER_SIZE as u64);
        writer.close().unwrap();
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path());
        let log = RecordingLog::new();
        {
            let writer = FileLogWriter::new(&config);
            writer.open().unwrap();
            writer.log(&note(&log, "a"), false).unwrap();
            writer.log(&note(&log, "b"), true).unwrap();
            assert_eq!(writer.stats().appends, 2);
            writer.close().unwrap();
        }
        assert_eq!(read_texts(&config.log_path()), vec!["a", "b"]);

        let writer = FileLogWriter::new(&config);
        writer.open().unwrap();
        assert!(!writer.is_empty());
        writer.log(&note(&log, "c"), true).unwrap();
        writer.close().unwrap();
        assert_eq!(read_texts(&config.log_path()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_log_when_closed() {
        let dir = tempdir().unwrap();
        let writer = FileLogWriter::new(&RedoConfig::for_testing(dir.path()));
        let log = RecordingLog::new();
        assert!(matches!(
            writer.log(&note(&log, "a"), true),
            Err(LogError::Closed)
        ));
    }

    #[test]
    fn test_open_truncates_torn_tail() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path());
        let log = RecordingLog::new();
        let good_end = {
            let writer = FileLogWriter::new(&config);
            writer.open().unwrap();
            writer.log(&note(&log, "a"), true).unwrap();
            let end = writer.size();
            writer.log(&note(&log, "b"), true).unwrap();
            writer.close().unwrap();
            end
        };
        let bytes = std::fs::read(config.log_path()).unwrap();
        std::fs::write(config.log_path(), &bytes[..bytes.len() - 2]).unwrap();

        let writer = FileLogWriter::new(&config);
        writer.open().unwrap();
        assert_eq!(writer.size(), good_end);
        writer.close().unwrap();
        assert_eq!(read_texts(&config.log_path()), vec!["a"]);
    }

    #[test]
    fn test_sync_append_fires_hooks() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path());
        let writer = FileLogWriter::new(&config);
        writer.open().unwrap();
        let log = RecordingLog::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let rec = note(&log, "a");
        rec.add_hooks(vec![hook(&fired)]);
        writer.log(&rec, false).unwrap();
        // zero fsync interval: every append is synced
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        writer.close().unwrap();
    }

    #[test]
    fn test_background_flush_fires_hooks() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path()).with_fsync_interval_ms(5);
        let writer = FileLogWriter::new(&config);
        writer.open().unwrap();
        let log = RecordingLog::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let rec = note(&log, "a");
        rec.add_hooks(vec![hook(&fired)]);
        writer.log(&rec, false).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        writer.close().unwrap();
    }

    #[test]
    fn test_close_fires_pending_hooks() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path()).with_fsync_interval_ms(60_000);
        let writer = FileLogWriter::new(&config);
        writer.open().unwrap();
        let log = RecordingLog::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let rec = note(&log, "a");
        rec.add_hooks(vec![hook(&fired)]);
        writer.log(&rec, false).unwrap();
        writer.close().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rollover_archives_and_carries() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path());
        let writer = FileLogWriter::new(&config);
        writer.open().unwrap();
        let log = RecordingLog::new();

        let done = note(&log, "done");
        let open = note(&log, "open");
        writer.log(&done, true).unwrap();
        writer.log(&open, true).unwrap();

        let archived = writer.rollover(&[Arc::clone(&open)]).unwrap().unwrap();
        assert_eq!(
            archived,
            config.archive_dir.join(RolloverManager::archive_file_name(1))
        );
        assert_eq!(writer.sequence(), 2);
        assert_eq!(writer.stats().rollovers, 1);
        assert!(!RolloverManager::new(config.log_path(), &config.archive_dir)
            .temp_path()
            .exists());

        writer.log(&note(&log, "after"), true).unwrap();
        writer.close().unwrap();

        assert_eq!(read_texts(&archived), vec!["done", "open"]);
        assert_eq!(read_texts(&config.log_path()), vec!["open", "after"]);
    }

    #[test]
    fn test_rollover_regenerates_blob() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path());
        let writer = FileLogWriter::new(&config);
        writer.open().unwrap();
        let log = RecordingLog::new();

        let mut rec = LogRecord::new(Box::new(NoteOp::new("blob").with_blob(&[7u8; 5000], true)));
        rec.start(&log, 1);
        let rec = Arc::new(rec);
        writer.log(&rec, true).unwrap();
        writer.rollover(&[Arc::clone(&rec)]).unwrap();
        writer.close().unwrap();

        let registry = note_registry();
        let (entries, _) = LogReader::open(&config.log_path(), &registry)
            .unwrap()
            .read_all()
            .unwrap();
        let blob = entries[0].record.blob().unwrap();
        assert!(blob.is_compressed());
        assert_eq!(blob.load_raw().unwrap(), vec![7u8; 5000]);
    }

    #[test]
    fn test_sequence_continues_after_archives() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path());
        std::fs::create_dir_all(&config.archive_dir).unwrap();
        std::fs::write(
            config.archive_dir.join(RolloverManager::archive_file_name(41)),
            b"",
        )
        .unwrap();
        let writer = FileLogWriter::new(&config);
        writer.open().unwrap();
        assert_eq!(writer.sequence(), 42);
        writer.close().unwrap();
    }
}

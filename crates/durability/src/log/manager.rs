//! Log manager
//!
//! [`LogManager`] is the single durability boundary every record is handed
//! to. It allocates transaction ids, keeps the map of open transactions,
//! writes commit and abort records, and decides when the active segment
//! rolls over.
//!
//! # Locking
//!
//! | Path | Lock |
//! |------|------|
//! | `log`, `commit`, `abort` | `rw` shared |
//! | `checkpoint`, `rollover` | `rw` exclusive |
//!
//! Holding `rw` exclusively during rollover guarantees no append is in
//! flight while open records are copied into the next segment.
//!
//! # Startup
//!
//! 1. Repair an interrupted rollover.
//! 2. Crash-recover the active segment (records committed there are
//!    replayed, deferred ones are held back).
//! 3. Open the writer, dropping any torn tail.
//! 4. Force a rollover so the replayed segment is archived.
//! 5. Re-append the held-back records with their commits and replay them on
//!    a background thread.

use super::rollover::RolloverManager;
use super::{FileLogWriter, LogError, LogWriter, RedoLog, WriterStats};
use crate::config::RedoConfig;
use crate::op::{AbortTxn, Checkpoint, CommitTxn, OpRegistry, Rollover};
use crate::recovery::{redo_record, run_crash_recovery, RedoOutcome};
use crate::txn::{CommitCallback, CommitHook, CommitInfo, LogRecord, TxnIdGenerator};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use zredo_core::{MailboxStore, TransactionId};

#[derive(Debug, Default)]
struct Counters {
    records_logged: AtomicU64,
    log_nanos: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    checkpoints: AtomicU64,
    rollovers: AtomicU64,
    recovered_records: AtomicU64,
    deferred_replayed: AtomicU64,
}

/// Snapshot of manager counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Records appended (control records included)
    pub records_logged: u64,
    /// Nanoseconds spent appending
    pub log_nanos: u64,
    /// Commit records written
    pub commits: u64,
    /// Abort records written
    pub aborts: u64,
    /// Checkpoint records written
    pub checkpoints: u64,
    /// Rollovers performed
    pub rollovers: u64,
    /// Records read by startup crash recovery
    pub recovered_records: u64,
    /// Deferred records replayed after startup
    pub deferred_replayed: u64,
    /// Writer counters
    pub writer: WriterStats,
}

impl ManagerStats {
    /// Mean append latency in milliseconds
    pub fn millis_per_record(&self) -> f64 {
        if self.records_logged == 0 {
            return 0.0;
        }
        self.log_nanos as f64 / self.records_logged as f64 / 1_000_000.0
    }
}

/// The redo log manager.
pub struct LogManager {
    config: RedoConfig,
    registry: Arc<OpRegistry>,
    writer: Arc<dyn LogWriter>,
    rollover_mgr: RolloverManager,
    ids: TxnIdGenerator,
    rw: RwLock<()>,
    active: Mutex<BTreeMap<TransactionId, Arc<LogRecord>>>,
    enabled: bool,
    recovery_mode: AtomicBool,
    in_crash_recovery: AtomicBool,
    started: AtomicBool,
    shutting_down: AtomicBool,
    post_startup: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

impl LogManager {
    /// Manager over segment files in `config.log_dir`.
    pub fn open(config: RedoConfig, registry: Arc<OpRegistry>) -> Result<Self, LogError> {
        config.validate()?;
        let writer: Arc<dyn LogWriter> = Arc::new(FileLogWriter::new(&config));
        Ok(Self::with_writer(config, registry, writer))
    }

    /// Manager over an explicit writer.
    pub fn with_writer(
        config: RedoConfig,
        registry: Arc<OpRegistry>,
        writer: Arc<dyn LogWriter>,
    ) -> Self {
        let rollover_mgr = RolloverManager::new(config.log_path(), &config.archive_dir);
        LogManager {
            enabled: config.enabled,
            config,
            registry,
            writer,
            rollover_mgr,
            ids: TxnIdGenerator::new(),
            rw: RwLock::new(()),
            active: Mutex::new(BTreeMap::new()),
            recovery_mode: AtomicBool::new(false),
            in_crash_recovery: AtomicBool::new(false),
            started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            post_startup: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Configuration
    pub fn config(&self) -> &RedoConfig {
        &self.config
    }

    /// Registry used to decode records during recovery
    pub fn registry(&self) -> &Arc<OpRegistry> {
        &self.registry
    }

    /// Whether records are written at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True while startup crash recovery is running
    pub fn in_crash_recovery(&self) -> bool {
        self.in_crash_recovery.load(Ordering::Acquire)
    }

    // ========================================================================
    // Startup / shutdown
    // ========================================================================

    /// Recover and open the log.
    pub fn start(self: &Arc<Self>, store: Arc<dyn MailboxStore>) -> Result<(), LogError> {
        if !self.enabled {
            tracing::info!("Redo logging is disabled");
            return Ok(());
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutting_down.store(false, Ordering::Release);

        self.in_crash_recovery.store(true, Ordering::Release);
        let recovered = self.recover(store.as_ref());
        self.in_crash_recovery.store(false, Ordering::Release);
        let (recovered_records, deferred) = match recovered {
            Ok(r) => r,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };

        self.writer.open()?;
        tracing::info!(
            sequence = self.writer.sequence(),
            size = self.writer.size(),
            "Redo log open"
        );

        if recovered_records > 0 {
            self.force_rollover()?;
        }

        if !deferred.is_empty() {
            let deferred = self.relog_deferred(deferred)?;
            let manager = Arc::clone(self);
            let handle = thread::Builder::new()
                .name("redo-post-startup".to_string())
                .spawn(move || manager.replay_deferred(deferred, store))?;
            *self.post_startup.lock() = Some(handle);
        }
        Ok(())
    }

    fn recover(&self, store: &dyn MailboxStore) -> Result<(u64, Vec<LogRecord>), LogError> {
        std::fs::create_dir_all(&self.config.log_dir)?;
        std::fs::create_dir_all(&self.config.archive_dir)?;
        // repaired even when crash recovery is off
        self.rollover_mgr.repair()?;

        if !self.config.crash_recovery {
            return Ok((0, Vec::new()));
        }

        self.recovery_mode.store(true, Ordering::Release);
        tracing::info!("Starting pre-startup crash recovery");
        let result = run_crash_recovery(
            self.rollover_mgr.log_path(),
            &self.registry,
            store,
            self.config.replay_policy,
        );
        self.recovery_mode.store(false, Ordering::Release);
        let report = result?;
        tracing::info!(
            replayed = report.stats.replayed,
            deferred = report.deferred.len(),
            incomplete = report.incomplete.len(),
            "Finished pre-startup crash recovery"
        );

        if let Some(max) = report.max_txn_id {
            self.ids.observe(max);
        }
        let records = report.stats.records_read as u64;
        self.counters
            .recovered_records
            .fetch_add(records, Ordering::Relaxed);
        Ok((records, report.deferred))
    }

    /// Re-append held-back records (with their commits) to the fresh segment
    /// so a crash before they are replayed does not lose them.
    fn relog_deferred(&self, records: Vec<LogRecord>) -> Result<Vec<Arc<LogRecord>>, LogError> {
        let mut relogged = Vec::with_capacity(records.len());
        for record in records {
            let record = Arc::new(record);
            {
                let _guard = self.rw.read();
                self.append(&record, false)?;
            }
            self.commit(&record, &mut Vec::new())?;
            relogged.push(record);
        }
        self.writer.flush()?;
        Ok(relogged)
    }

    fn replay_deferred(&self, records: Vec<Arc<LogRecord>>, store: Arc<dyn MailboxStore>) {
        tracing::info!(records = records.len(), "Starting post-startup crash recovery");
        let mut interrupted = false;
        for record in &records {
            if self.shutting_down.load(Ordering::Acquire) {
                interrupted = true;
                break;
            }
            match redo_record(record, store.as_ref()) {
                Ok(RedoOutcome::Applied) | Ok(RedoOutcome::AlreadyApplied(_)) => {
                    self.counters
                        .deferred_replayed
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!(
                        record = %record,
                        error = %e,
                        "Redo failed; state of affected item is indeterminate"
                    );
                }
            }
        }
        if interrupted {
            tracing::info!("Post-startup crash recovery interrupted by shutdown");
        } else {
            tracing::info!("Finished post-startup crash recovery");
        }
    }

    /// Wait for post-startup recovery, roll over, flush and close.
    pub fn stop(&self) -> Result<(), LogError> {
        if !self.enabled || !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutting_down.store(true, Ordering::Release);
        if let Some(handle) = self.post_startup.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Post-startup recovery thread panicked");
            }
        }

        self.force_rollover()?;
        self.writer.flush()?;
        self.writer.close()?;

        let stats = self.stats();
        tracing::info!(
            items = stats.records_logged,
            ms_per_item = stats.millis_per_record(),
            "Redo log stopped"
        );
        Ok(())
    }

    // ========================================================================
    // Appends
    // ========================================================================

    fn accepting(&self) -> bool {
        self.enabled && !self.recovery_mode.load(Ordering::Acquire)
    }

    /// Append without the rollover check. Caller holds `rw`.
    fn append(&self, record: &Arc<LogRecord>, sync: bool) -> Result<(), LogError> {
        let start = Instant::now();
        self.writer.log(record, sync)?;
        if record.is_start_marker() {
            self.active
                .lock()
                .insert(record.txn_id(), Arc::clone(record));
        }
        self.counters.records_logged.fetch_add(1, Ordering::Relaxed);
        self.counters
            .log_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn log_control(
        &self,
        control: &Arc<LogRecord>,
        target: &LogRecord,
        sync: bool,
    ) -> Result<(), LogError> {
        {
            let _guard = self.rw.read();
            self.append(control, sync)?;
            self.active.lock().remove(&target.txn_id());
        }
        control.clear_serialized();
        self.rollover_after_append();
        Ok(())
    }

    /// Roll over if the last append crossed a limit.
    ///
    /// The record that triggered the check is already in the log, so a
    /// failed rollover is reported here and the segment keeps growing
    /// until a later append retries it.
    fn rollover_after_append(&self) {
        if !self.rollover_needed(false) {
            return;
        }
        if let Err(e) = self.rollover(false, false) {
            tracing::error!(
                sequence = self.writer.sequence(),
                size = self.writer.size(),
                error = %e,
                "Rollover after append failed"
            );
        }
    }

    /// Make every appended record durable.
    pub fn flush(&self) -> Result<(), LogError> {
        if self.enabled {
            self.writer.flush()?;
        }
        Ok(())
    }

    // ========================================================================
    // Checkpoint / rollover
    // ========================================================================

    /// Write a checkpoint listing the open transactions.
    pub fn checkpoint(&self) -> Result<Vec<TransactionId>, LogError> {
        if !self.accepting() {
            return Ok(Vec::new());
        }
        let _guard = self.rw.write();
        self.write_checkpoint()
    }

    fn write_checkpoint(&self) -> Result<Vec<TransactionId>, LogError> {
        let ids: Vec<TransactionId> = self.active.lock().keys().copied().collect();
        let record = Arc::new(LogRecord::standalone(Box::new(Checkpoint::new(ids.clone()))));
        self.append(&record, true)?;
        self.counters.checkpoints.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(active = ids.len(), "Wrote checkpoint");
        Ok(ids)
    }

    /// True if the active segment should roll over now.
    ///
    /// A forced rollover only needs a non-empty segment. Otherwise the
    /// segment rolls at the hard limit, or at the soft limit once it has
    /// grown since open and is older than the minimum age.
    pub fn rollover_needed(&self, force: bool) -> bool {
        if self.writer.is_empty() {
            return false;
        }
        if force {
            return true;
        }
        let size = self.writer.size();
        if size >= self.config.rollover_hard_max_bytes {
            return true;
        }
        if size < self.config.rollover_soft_max_bytes || size <= self.writer.opened_size() {
            return false;
        }
        let age = zredo_core::now_millis().saturating_sub(self.writer.create_time());
        age >= 0 && age as u64 >= self.config.rollover_min_age_ms
    }

    /// Roll over unconditionally (if the segment holds anything).
    pub fn force_rollover(&self) -> Result<Option<PathBuf>, LogError> {
        self.rollover(true, false)
    }

    /// Close the active segment and start the next one.
    ///
    /// Writes a checkpoint (unless `skip_checkpoint`) and a rollover marker,
    /// then hands every open record to the writer to re-append.
    pub fn rollover(&self, force: bool, skip_checkpoint: bool) -> Result<Option<PathBuf>, LogError> {
        if !self.enabled {
            return Ok(None);
        }
        let _guard = self.rw.write();
        if !self.rollover_needed(force) {
            return Ok(None);
        }

        if !skip_checkpoint {
            self.write_checkpoint()?;
        }
        let sequence = self.writer.sequence();
        let marker = Rollover::new(sequence, RolloverManager::archive_file_name(sequence));
        self.append(&Arc::new(LogRecord::standalone(Box::new(marker))), true)?;

        let carry: Vec<Arc<LogRecord>> = self.active.lock().values().cloned().collect();
        let archived = self.writer.rollover(&carry)?;
        self.counters.rollovers.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            sequence = sequence,
            next = self.writer.sequence(),
            carried = carry.len(),
            archived = ?archived,
            "Redo log rollover"
        );
        Ok(archived)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Sequence of the active segment
    pub fn current_sequence(&self) -> u64 {
        self.writer.sequence()
    }

    /// Archived segments with sequence >= `from_sequence`, oldest first.
    pub fn archived_logs(&self, from_sequence: u64) -> Result<Vec<(u64, PathBuf)>, LogError> {
        Ok(self.rollover_mgr.archived_logs(from_sequence)?)
    }

    /// Transactions currently open, ascending
    pub fn active_txn_ids(&self) -> Vec<TransactionId> {
        self.active.lock().keys().copied().collect()
    }

    /// Counters
    pub fn stats(&self) -> ManagerStats {
        let c = &self.counters;
        ManagerStats {
            records_logged: c.records_logged.load(Ordering::Relaxed),
            log_nanos: c.log_nanos.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            aborts: c.aborts.load(Ordering::Relaxed),
            checkpoints: c.checkpoints.load(Ordering::Relaxed),
            rollovers: c.rollovers.load(Ordering::Relaxed),
            recovered_records: c.recovered_records.load(Ordering::Relaxed),
            deferred_replayed: c.deferred_replayed.load(Ordering::Relaxed),
            writer: self.writer.stats(),
        }
    }
}

impl RedoLog for LogManager {
    fn next_txn_id(&self) -> TransactionId {
        self.ids.next()
    }

    fn log(&self, record: &Arc<LogRecord>, sync: bool) -> Result<(), LogError> {
        if !self.accepting() {
            return Ok(());
        }
        {
            let _guard = self.rw.read();
            self.append(record, sync)?;
        }
        self.rollover_after_append();
        Ok(())
    }

    fn commit(
        &self,
        record: &Arc<LogRecord>,
        callbacks: &mut Vec<CommitCallback>,
    ) -> Result<(), LogError> {
        let control = Arc::new(LogRecord::control(
            Box::new(CommitTxn::new(record.opcode())),
            record,
        ));
        let info = CommitInfo {
            txn_id: record.txn_id(),
            opcode: record.opcode(),
            mailbox_id: record.mailbox_id(),
            timestamp: control.timestamp(),
        };
        if !self.accepting() {
            for callback in callbacks.drain(..) {
                callback(&info);
            }
            return Ok(());
        }
        control.add_hooks(
            callbacks
                .drain(..)
                .map(|cb| CommitHook::new(info, cb))
                .collect(),
        );
        // commit records are not synced; the next sync covers them
        if let Err(e) = self.log_control(&control, record, false) {
            callbacks.extend(control.take_hooks().into_iter().map(CommitHook::into_callback));
            return Err(e);
        }
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn abort(&self, record: &Arc<LogRecord>) -> Result<(), LogError> {
        if !self.accepting() {
            return Ok(());
        }
        let control = Arc::new(LogRecord::control(
            Box::new(AbortTxn::new(record.opcode())),
            record,
        ));
        // synced so crash recovery never sees the transaction as open
        self.log_control(&control, record, true)?;
        self.counters.aborts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("log_path", &self.rollover_mgr.log_path())
            .field("enabled", &self.enabled)
            .field("sequence", &self.writer.sequence())
            .field("active", &self.active.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogReader, MemoryLogWriter};
    use crate::op::Opcode;
    use crate::testing::{note_registry, NoteOp, RecordingStore};
    use crate::txn::TxnState;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::tempdir;

    fn memory_manager(config: RedoConfig) -> (Arc<LogManager>, Arc<MemoryLogWriter>) {
        let writer = Arc::new(MemoryLogWriter::new());
        writer.open().unwrap();
        let manager = LogManager::with_writer(config, Arc::new(note_registry()), writer.clone());
        (Arc::new(manager), writer)
    }

    fn started(manager: &LogManager, text: &str, item: i32) -> Arc<LogRecord> {
        let mut rec = LogRecord::new(Box::new(NoteOp::new(text).with_item(item)));
        rec.start(manager, zredo_core::now_millis());
        Arc::new(rec)
    }

    fn opcodes(writer: &MemoryLogWriter) -> Vec<Opcode> {
        writer
            .records(&note_registry())
            .unwrap()
            .iter()
            .map(|r| r.opcode())
            .collect()
    }

    #[test]
    fn test_commit_writes_record_and_fires_callback() {
        let dir = tempdir().unwrap();
        let (manager, writer) = memory_manager(RedoConfig::for_testing(dir.path()));
        let rec = started(&manager, "a", 1);
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        let txn = rec.txn_id();
        rec.on_commit(move |info| {
            assert_eq!(info.txn_id, txn);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        rec.log(&*manager, true).unwrap();
        assert_eq!(manager.active_txn_ids(), vec![txn]);
        rec.commit(&*manager).unwrap();
        rec.commit(&*manager).unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(manager.active_txn_ids().is_empty());
        assert_eq!(opcodes(&writer), vec![NoteOp::OPCODE, Opcode::COMMIT_TXN]);
        assert_eq!(manager.stats().commits, 1);
    }

    #[test]
    fn test_abort_writes_record() {
        let dir = tempdir().unwrap();
        let (manager, writer) = memory_manager(RedoConfig::for_testing(dir.path()));
        let rec = started(&manager, "a", 1);
        rec.log(&*manager, false).unwrap();
        rec.abort(&*manager).unwrap();
        rec.abort(&*manager).unwrap();
        assert!(manager.active_txn_ids().is_empty());
        assert_eq!(opcodes(&writer), vec![NoteOp::OPCODE, Opcode::ABORT_TXN]);
        assert_eq!(manager.stats().aborts, 1);
    }

    #[test]
    fn test_disabled_manager_ignores_records() {
        let dir = tempdir().unwrap();
        let (manager, writer) =
            memory_manager(RedoConfig::for_testing(dir.path()).with_enabled(false));
        let rec = started(&manager, "a", 1);
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        rec.on_commit(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        rec.log(&*manager, true).unwrap();
        rec.commit(&*manager).unwrap();
        assert!(writer.frames().is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_chained_child_commits_after_parent() {
        let dir = tempdir().unwrap();
        let (manager, writer) = memory_manager(RedoConfig::for_testing(dir.path()));
        let log: &dyn RedoLog = &*manager;

        let parent = started(&manager, "parent", 1);
        parent.log(log, true).unwrap();

        let mut child = LogRecord::chained(Box::new(NoteOp::new("child").with_item(2)));
        child.start(log, zredo_core::now_millis());
        let child = Arc::new(child);
        child.attach_to_parent(&parent, log).unwrap();
        child.log(log, false).unwrap();
        // worker finishes before the parent commits
        child.commit(log).unwrap();
        assert!(child.is_commit_pending());

        parent.commit(log).unwrap();

        let records = writer.records(&note_registry()).unwrap();
        let commits: Vec<TransactionId> = records
            .iter()
            .filter(|r| r.opcode() == Opcode::COMMIT_TXN)
            .map(|r| r.txn_id())
            .collect();
        assert_eq!(commits, vec![parent.txn_id(), child.txn_id()]);
    }

    #[test]
    fn test_rollover_carries_open_records() {
        let dir = tempdir().unwrap();
        let (manager, writer) = memory_manager(RedoConfig::for_testing(dir.path()));
        let done = started(&manager, "done", 1);
        let open = started(&manager, "open", 2);
        done.log(&*manager, true).unwrap();
        open.log(&*manager, true).unwrap();
        done.commit(&*manager).unwrap();

        manager.force_rollover().unwrap();
        assert_eq!(manager.current_sequence(), 2);

        let registry = note_registry();
        let archived = writer.archived_records(1, &registry).unwrap();
        let tail: Vec<Opcode> = archived.iter().rev().take(2).map(|r| r.opcode()).collect();
        assert_eq!(tail, vec![Opcode::ROLLOVER, Opcode::CHECKPOINT]);
        let checkpoint = archived[archived.len() - 2].op_as::<Checkpoint>().unwrap();
        assert_eq!(checkpoint.active_txns, vec![open.txn_id()]);

        let current = writer.records(&registry).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].txn_id(), open.txn_id());
        assert_eq!(manager.stats().rollovers, 1);
    }

    #[test]
    fn test_forced_rollover_skips_empty_segment() {
        let dir = tempdir().unwrap();
        let (manager, writer) = memory_manager(RedoConfig::for_testing(dir.path()));
        assert!(!manager.rollover_needed(true));
        assert_eq!(manager.force_rollover().unwrap(), None);
        assert_eq!(writer.sequence(), 1);
    }

    #[test]
    fn test_rollover_policy_limits() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path()).with_rollover_limits(1, u64::MAX, 0);
        let (manager, writer) = memory_manager(config);
        // soft limit reached and grown since open: rolls on the next append
        let rec = started(&manager, "a", 1);
        rec.log(&*manager, true).unwrap();
        assert_eq!(writer.sequence(), 2);
        assert_eq!(manager.current_sequence(), 2);

        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path())
            .with_rollover_limits(1, u64::MAX, 60 * 60 * 1000);
        let (manager, writer) = memory_manager(config);
        let rec = started(&manager, "a", 1);
        rec.log(&*manager, true).unwrap();
        // too young for a soft rollover
        assert_eq!(writer.sequence(), 1);
        assert!(manager.rollover_needed(true));
    }

    /// Memory writer whose rollover always fails.
    struct StuckWriter(MemoryLogWriter);

    impl LogWriter for StuckWriter {
        fn open(&self) -> Result<(), LogError> {
            self.0.open()
        }
        fn close(&self) -> Result<(), LogError> {
            self.0.close()
        }
        fn log(&self, record: &LogRecord, sync: bool) -> Result<(), LogError> {
            self.0.log(record, sync)
        }
        fn flush(&self) -> Result<(), LogError> {
            self.0.flush()
        }
        fn size(&self) -> u64 {
            self.0.size()
        }
        fn opened_size(&self) -> u64 {
            self.0.opened_size()
        }
        fn create_time(&self) -> i64 {
            self.0.create_time()
        }
        fn sequence(&self) -> u64 {
            self.0.sequence()
        }
        fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
        fn rollover(&self, _carry: &[Arc<LogRecord>]) -> Result<Option<PathBuf>, LogError> {
            Err(LogError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "archive dir is read-only",
            )))
        }
        fn stats(&self) -> WriterStats {
            self.0.stats()
        }
    }

    #[test]
    fn test_failed_rollover_does_not_fail_the_append() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path()).with_rollover_limits(1, 1, 0);
        let writer = Arc::new(StuckWriter(MemoryLogWriter::new()));
        writer.open().unwrap();
        let manager = LogManager::with_writer(config, Arc::new(note_registry()), writer.clone());

        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        let rec = started(&manager, "a", 1);
        rec.on_commit(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        rec.log(&manager, false).unwrap();
        assert_eq!(rec.state(), TxnState::Active);
        assert_eq!(manager.active_txn_ids(), vec![rec.txn_id()]);

        rec.commit(&manager).unwrap();
        assert_eq!(rec.state(), TxnState::Committed);
        assert!(manager.active_txn_ids().is_empty());
        manager.flush().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let ops = opcodes(&writer.0);
        assert_eq!(ops.first(), Some(&NoteOp::OPCODE));
        assert_eq!(ops.iter().filter(|op| **op == Opcode::COMMIT_TXN).count(), 1);
        assert_eq!(manager.current_sequence(), 1);
        assert_eq!(manager.stats().rollovers, 0);
    }

    #[test]
    fn test_start_recovers_and_archives() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path());
        let registry = Arc::new(note_registry());

        {
            let manager = Arc::new(LogManager::open(config.clone(), Arc::clone(&registry)).unwrap());
            manager.start(Arc::new(RecordingStore::new())).unwrap();
            let committed = started(&manager, "committed", 1);
            committed.log(&*manager, true).unwrap();
            committed.commit(&*manager).unwrap();
            let open = started(&manager, "open", 2);
            open.log(&*manager, true).unwrap();
            manager.flush().unwrap();
            // crash: no stop()
        }

        let store = Arc::new(RecordingStore::new());
        let manager = Arc::new(LogManager::open(config.clone(), registry).unwrap());
        manager.start(store.clone()).unwrap();
        assert_eq!(
            store.folders().values().cloned().collect::<Vec<_>>(),
            vec!["committed"]
        );
        assert!(manager.stats().recovered_records >= 3);
        assert_eq!(manager.current_sequence(), 2);
        assert_eq!(manager.archived_logs(0).unwrap().len(), 1);
        manager.stop().unwrap();
    }

    #[test]
    fn test_deferred_records_replay_after_startup() {
        let dir = tempdir().unwrap();
        let config = RedoConfig::for_testing(dir.path());
        let registry = Arc::new(note_registry());

        {
            let manager = Arc::new(LogManager::open(config.clone(), Arc::clone(&registry)).unwrap());
            manager.start(Arc::new(RecordingStore::new())).unwrap();
            let mut rec = LogRecord::new(Box::new(NoteOp::new("slow").with_item(9).deferred()));
            rec.start(&*manager, 1);
            let rec = Arc::new(rec);
            rec.log(&*manager, true).unwrap();
            rec.commit(&*manager).unwrap();
            manager.flush().unwrap();
        }

        let store = Arc::new(RecordingStore::new());
        let manager = Arc::new(LogManager::open(config.clone(), Arc::clone(&registry)).unwrap());
        manager.start(store.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.folders().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        manager.stop().unwrap();
        assert_eq!(
            store.folders().values().cloned().collect::<Vec<_>>(),
            vec!["slow"]
        );
        assert_eq!(manager.stats().deferred_replayed, 1);

        // the deferred record was re-appended with its commit before replay
        let (_, path) = manager.archived_logs(2).unwrap().into_iter().next().unwrap();
        let (entries, _) = LogReader::open(&path, &registry).unwrap().read_all().unwrap();
        assert_eq!(entries[0].record.opcode(), NoteOp::OPCODE);
        assert_eq!(entries[1].record.opcode(), Opcode::COMMIT_TXN);
    }

    #[test]
    fn test_recovery_mode_ignores_logging() {
        let dir = tempdir().unwrap();
        let (manager, writer) = memory_manager(RedoConfig::for_testing(dir.path()));
        manager.recovery_mode.store(true, Ordering::SeqCst);
        let rec = started(&manager, "a", 1);
        rec.log(&*manager, true).unwrap();
        assert!(writer.frames().is_empty());
    }
}

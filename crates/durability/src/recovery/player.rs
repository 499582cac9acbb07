//! Redo player: open-transaction tracking and replay

use super::{FailurePolicy, ReplayPolicy};
use crate::blob::BlobError;
use crate::log::{LogReadError, LogReader, TruncateInfo};
use crate::op::{Checkpoint, OpRegistry, Opcode};
use crate::txn::LogRecord;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::path::{Path, PathBuf};
use zredo_core::{MailboxStore, StoreError, TransactionId, Version};

/// Recovery errors.
///
/// The first three mean the log itself is unreadable; `Replay` means the
/// log was fine but the store could not reapply one operation.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// Bad checksum, bad magic, or undecodable envelope in a complete frame
    #[error("Redo log corrupt: {path:?} at offset {offset}: {detail}")]
    Corruption {
        /// Segment file
        path: PathBuf,
        /// Frame offset
        offset: u64,
        /// What was wrong
        detail: String,
    },

    /// Record newer than this build understands
    #[error("Unsupported redo log version {found} in {path:?} at offset {offset} (highest known {max_known})")]
    UnsupportedVersion {
        /// Segment file
        path: PathBuf,
        /// Frame offset
        offset: u64,
        /// Declared version
        found: Version,
        /// Highest known version
        max_known: Version,
    },

    /// No registered variant for an opcode
    #[error("Unknown opcode {opcode} in {path:?} at offset {offset}")]
    UnknownOpcode {
        /// Segment file
        path: PathBuf,
        /// Frame offset
        offset: u64,
        /// Opcode found
        opcode: i32,
    },

    /// The store rejected a committed operation
    #[error("Redo of opcode {opcode} in txn {txn_id} failed: {source}")]
    Replay {
        /// Transaction of the failed record
        txn_id: TransactionId,
        /// Variant of the failed record
        opcode: Opcode,
        /// Store failure
        #[source]
        source: StoreError,
    },

    /// Deferred record's side channel could not be read
    #[error("Blob side channel unreadable: {0}")]
    Blob(#[from] BlobError),

    /// I/O error
    #[error("Recovery I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecoveryError {
    /// True when the log could not be read (as opposed to a failed redo).
    pub fn is_log_unreadable(&self) -> bool {
        matches!(
            self,
            RecoveryError::Corruption { .. }
                | RecoveryError::UnsupportedVersion { .. }
                | RecoveryError::UnknownOpcode { .. }
        )
    }
}

impl From<LogReadError> for RecoveryError {
    fn from(e: LogReadError) -> Self {
        match e {
            LogReadError::Io(io) => RecoveryError::Io(io),
            LogReadError::Corrupt {
                path,
                offset,
                detail,
            } => RecoveryError::Corruption {
                path,
                offset,
                detail,
            },
            LogReadError::UnsupportedVersion {
                path,
                offset,
                found,
                max_known,
            } => RecoveryError::UnsupportedVersion {
                path,
                offset,
                found,
                max_known,
            },
            LogReadError::UnknownOpcode {
                path,
                offset,
                opcode,
            } => RecoveryError::UnknownOpcode {
                path,
                offset,
                opcode,
            },
        }
    }
}

/// Replay counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Segments opened
    pub segments_read: usize,
    /// Records decoded
    pub records_read: usize,
    /// Commit records matched to an open transaction
    pub committed: usize,
    /// Records applied to the store
    pub replayed: usize,
    /// Redos the store reported as already applied
    pub idempotent_skips: usize,
    /// Transactions dropped by an abort record
    pub aborted: usize,
    /// Transactions still open when replay finished
    pub incomplete: usize,
    /// Redos that failed and were skipped
    pub failed: usize,
    /// Committed records held back for deferred replay
    pub deferred: usize,
    /// Commit or abort records with no open transaction
    pub orphan_controls: usize,
    /// Checkpoint records seen
    pub checkpoints: usize,
    /// Open transactions a checkpoint did not list
    pub checkpoint_mismatches: usize,
    /// Rollover markers seen
    pub rollovers: usize,
    /// Torn tail of the last segment, if any
    pub truncated_tail: Option<TruncateInfo>,
}

/// Result of [`RedoPlayer::finish`].
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Counters
    pub stats: ReplayStats,
    /// Committed records whose variant defers crash recovery, in commit order
    pub deferred: Vec<LogRecord>,
    /// Transactions open at the end of the log, ascending
    pub incomplete: Vec<TransactionId>,
    /// Highest transaction id seen in any record
    pub max_txn_id: Option<TransactionId>,
}

/// Outcome of a successful [`redo_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedoOutcome {
    /// The store applied the operation
    Applied,
    /// The store reported the effect already in place
    AlreadyApplied(StoreError),
}

/// Apply one record to the store, treating idempotent outcomes as success.
pub fn redo_record(record: &LogRecord, store: &dyn MailboxStore) -> Result<RedoOutcome, StoreError> {
    record.set_unlogged_replay(true);
    tracing::debug!(record = %record, "REDOING");
    match record.redo(store) {
        Ok(()) => Ok(RedoOutcome::Applied),
        Err(e) if e.is_idempotent_outcome() => {
            tracing::info!(
                txn = %record.txn_id(),
                opcode = %record.opcode(),
                outcome = %e,
                "Redo found operation already applied"
            );
            Ok(RedoOutcome::AlreadyApplied(e))
        }
        Err(e) => Err(e),
    }
}

/// Sequential replayer over one or more segments.
pub struct RedoPlayer<'a> {
    registry: &'a OpRegistry,
    policy: ReplayPolicy,
    max_version: Version,
    defer: bool,
    open: FxHashMap<TransactionId, LogRecord>,
    deferred: Vec<LogRecord>,
    max_txn_id: Option<TransactionId>,
    stats: ReplayStats,
}

impl<'a> RedoPlayer<'a> {
    /// Player decoding with `registry`; halts on the first failed redo.
    pub fn new(registry: &'a OpRegistry) -> Self {
        RedoPlayer {
            registry,
            policy: ReplayPolicy::default(),
            max_version: Version::CURRENT,
            defer: false,
            open: FxHashMap::default(),
            deferred: Vec::new(),
            max_txn_id: None,
            stats: ReplayStats::default(),
        }
    }

    /// Set the failure policy
    pub fn with_policy(mut self, policy: ReplayPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reject records newer than `version`
    pub fn with_max_version(mut self, version: Version) -> Self {
        self.max_version = version;
        self
    }

    /// Hold back committed records whose variant defers crash recovery.
    pub fn deferring(mut self, defer: bool) -> Self {
        self.defer = defer;
        self
    }

    /// Counters so far
    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }

    /// Transactions currently open, ascending
    pub fn open_transactions(&self) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self.open.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Replay one segment file.
    pub fn replay_file(&mut self, path: &Path, store: &dyn MailboxStore) -> Result<(), RecoveryError> {
        let registry = self.registry;
        let mut reader = LogReader::open(path, registry)?.with_max_version(self.max_version);
        tracing::info!(
            path = ?path,
            sequence = reader.header().map(|h| h.sequence),
            "Replaying redo log"
        );
        self.stats.segments_read += 1;
        while let Some(entry) = reader.next_record()? {
            self.apply(entry.record, store)?;
        }
        if let Some(info) = reader.truncate_info() {
            self.stats.truncated_tail = Some(info.clone());
        }
        Ok(())
    }

    /// Replay segments in order, carrying open transactions across them.
    pub fn replay_files<I, P>(&mut self, paths: I, store: &dyn MailboxStore) -> Result<(), RecoveryError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self.replay_file(path.as_ref(), store)?;
        }
        Ok(())
    }

    /// Feed one decoded record.
    pub fn apply(&mut self, record: LogRecord, store: &dyn MailboxStore) -> Result<(), RecoveryError> {
        self.stats.records_read += 1;
        let txn_id = record.txn_id();
        if !txn_id.is_none() && self.max_txn_id.map_or(true, |max| txn_id > max) {
            self.max_txn_id = Some(txn_id);
        }
        match record.opcode() {
            Opcode::COMMIT_TXN => match self.open.remove(&txn_id) {
                Some(start) => {
                    self.stats.committed += 1;
                    self.replay_committed(start, store)?;
                }
                None => {
                    self.stats.orphan_controls += 1;
                    tracing::warn!(txn = %txn_id, "Commit record for unknown transaction");
                }
            },
            Opcode::ABORT_TXN => match self.open.remove(&txn_id) {
                Some(_) => self.stats.aborted += 1,
                None => {
                    self.stats.orphan_controls += 1;
                    tracing::warn!(txn = %txn_id, "Abort record for unknown transaction");
                }
            },
            Opcode::CHECKPOINT => {
                self.stats.checkpoints += 1;
                if let Some(checkpoint) = record.op_as::<Checkpoint>() {
                    self.check_checkpoint(checkpoint);
                }
            }
            Opcode::ROLLOVER => self.stats.rollovers += 1,
            opcode if opcode.is_start_marker() => {
                // rollover re-appends open start records into the next segment
                if self.open.insert(txn_id, record).is_some() {
                    tracing::debug!(txn = %txn_id, "Start record seen again");
                }
            }
            opcode => tracing::debug!(opcode = %opcode, "Ignoring control record"),
        }
        Ok(())
    }

    fn check_checkpoint(&mut self, checkpoint: &Checkpoint) {
        let listed: FxHashSet<TransactionId> = checkpoint.active_txns.iter().copied().collect();
        for txn_id in self.open_transactions() {
            if !listed.contains(&txn_id) {
                self.stats.checkpoint_mismatches += 1;
                tracing::warn!(txn = %txn_id, "Open transaction missing from checkpoint");
            }
        }
    }

    fn replay_committed(&mut self, mut start: LogRecord, store: &dyn MailboxStore) -> Result<(), RecoveryError> {
        if self.defer && start.defer_crash_recovery() {
            start.detach_blob()?;
            tracing::debug!(txn = %start.txn_id(), opcode = %start.opcode(), "Deferring redo until after startup");
            self.stats.deferred += 1;
            self.deferred.push(start);
            return Ok(());
        }

        match redo_record(&start, store) {
            Ok(RedoOutcome::Applied) => self.stats.replayed += 1,
            Ok(RedoOutcome::AlreadyApplied(_)) => self.stats.idempotent_skips += 1,
            Err(e) => {
                tracing::error!(record = %start, error = %e, "Redo failed");
                match self.policy.on_failure {
                    FailurePolicy::Halt => {
                        return Err(RecoveryError::Replay {
                            txn_id: start.txn_id(),
                            opcode: start.opcode(),
                            source: e,
                        })
                    }
                    FailurePolicy::SkipRecord => self.stats.failed += 1,
                }
            }
        }
        Ok(())
    }

    /// End replay and report what is left.
    pub fn finish(mut self) -> RecoveryReport {
        let incomplete = self.open_transactions();
        self.stats.incomplete = incomplete.len();
        tracing::info!(
            records = self.stats.records_read,
            replayed = self.stats.replayed,
            skipped = self.stats.idempotent_skips,
            incomplete = self.stats.incomplete,
            deferred = self.stats.deferred,
            "Redo replay finished"
        );
        RecoveryReport {
            stats: self.stats,
            deferred: self.deferred,
            incomplete,
            max_txn_id: self.max_txn_id,
        }
    }
}

/// Crash recovery over the active segment: committed records are replayed,
/// deferred ones are returned for replay after startup.
pub fn run_crash_recovery(
    log_path: &Path,
    registry: &OpRegistry,
    store: &dyn MailboxStore,
    policy: ReplayPolicy,
) -> Result<RecoveryReport, RecoveryError> {
    let mut player = RedoPlayer::new(registry).with_policy(policy).deferring(true);
    if log_path.exists() {
        player.replay_file(log_path, store)?;
    }
    Ok(player.finish())
}

//! Log records and their transaction lifecycle
//!
//! A [`LogRecord`] wraps one operation variant with the common header and
//! the in-memory lifecycle state:
//!
//! ```text
//! Inactive ──log()──▶ Active ──commit()──▶ Committed
//!     │                  │
//!     └──abort()─────────┴─────abort()───▶ Aborted
//! ```
//!
//! Only start markers become `Active`; control records are written once and
//! stay `Inactive`. Commit and abort are idempotent: the second call on a
//! terminal record does nothing.
//!
//! # Locking
//!
//! - `lifecycle` guards state transitions, chained children and callbacks.
//!   A parent holds its own `lifecycle` lock while it notifies the log and
//!   cascades into its children, so lock order is always parent → child.
//! - `serialized` guards only the cached primary bytes. A rollover reading
//!   the cache never contends with a thread committing the record.

use super::chain::CommitGate;
use crate::blob::{Blob, BlobSource};
use crate::format::{CodecError, Preamble, RecordHeader, RedoInput, RedoOutput};
use crate::log::{LogError, RedoLog};
use crate::op::{OpRegistry, Opcode, RedoOp};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use zredo_core::{
    MailboxId, MailboxStore, OperationContext, StoreResult, TransactionId, Version,
};

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum RedoError {
    /// The log rejected the record
    #[error("Log append failed: {0}")]
    Log(#[from] LogError),

    /// Mailbox id may be assigned only once
    #[error("Mailbox id already set to {current}, cannot change to {requested}")]
    MailboxAlreadySet {
        /// Mailbox already assigned
        current: MailboxId,
        /// Mailbox the caller tried to assign
        requested: MailboxId,
    },

    /// Record already committed or aborted
    #[error("Transaction {txn_id} already {state}")]
    Finished {
        /// Transaction of the record
        txn_id: TransactionId,
        /// Terminal state
        state: TxnState,
    },
}

/// In-memory transaction state of a record (never persisted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxnState {
    /// Not yet appended
    Inactive = 0,
    /// Start marker appended, no terminal record yet
    Active = 1,
    /// Commit recorded
    Committed = 2,
    /// Abort recorded (or abandoned before append)
    Aborted = 3,
}

impl TxnState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TxnState::Active,
            2 => TxnState::Committed,
            3 => TxnState::Aborted,
            _ => TxnState::Inactive,
        }
    }

    /// True for `Committed` and `Aborted`
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnState::Inactive => "inactive",
            TxnState::Active => "active",
            TxnState::Committed => "committed",
            TxnState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// What a commit callback learns about the durable commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    /// Committed transaction
    pub txn_id: TransactionId,
    /// Opcode of the committed record
    pub opcode: Opcode,
    /// Mailbox of the committed record
    pub mailbox_id: MailboxId,
    /// Time of the commit (millis)
    pub timestamp: i64,
}

/// Callback run once a commit is durable
pub type CommitCallback = Box<dyn FnOnce(&CommitInfo) + Send>;

/// Callback bound to the commit it waits for.
pub struct CommitHook {
    info: CommitInfo,
    callback: CommitCallback,
}

impl CommitHook {
    /// Bind a callback to a commit
    pub fn new(info: CommitInfo, callback: CommitCallback) -> Self {
        CommitHook { info, callback }
    }

    /// Commit the hook waits for
    pub fn info(&self) -> &CommitInfo {
        &self.info
    }

    /// Run the callback.
    pub fn fire(self) {
        (self.callback)(&self.info)
    }

    /// Unbind the callback, for a commit that was never written.
    pub fn into_callback(self) -> CommitCallback {
        self.callback
    }
}

impl fmt::Debug for CommitHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitHook").field("info", &self.info).finish()
    }
}

/// Where a decoded frame lives on disk, so blob content can stay there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobOrigin {
    /// Segment file
    pub path: PathBuf,
    /// File offset of the first byte of the record
    pub offset: u64,
}

/// Decoding knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Highest version the reader accepts
    pub max_version: Version,
    /// When set, blob content becomes a [`BlobSource::FileRange`] instead of
    /// an in-memory copy
    pub blob_origin: Option<BlobOrigin>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_version: Version::CURRENT,
            blob_origin: None,
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    chained: SmallVec<[Arc<LogRecord>; 2]>,
    callbacks: Vec<CommitCallback>,
    hooks: Vec<CommitHook>,
    commit_requested: bool,
}

/// One operation plus its header and lifecycle.
pub struct LogRecord {
    op: Box<dyn RedoOp>,
    version: Version,
    header: RecordHeader,
    mailbox_assigned: bool,
    unlogged_replay: AtomicBool,
    state: AtomicU8,
    lifecycle: Mutex<Lifecycle>,
    serialized: Mutex<Option<Arc<[u8]>>>,
    gate: Option<CommitGate>,
    parent: Mutex<Weak<LogRecord>>,
}

impl LogRecord {
    fn build(op: Box<dyn RedoOp>, version: Version, gate: Option<CommitGate>) -> Self {
        LogRecord {
            op,
            version,
            header: RecordHeader::default(),
            mailbox_assigned: false,
            unlogged_replay: AtomicBool::new(false),
            state: AtomicU8::new(TxnState::Inactive as u8),
            lifecycle: Mutex::new(Lifecycle::default()),
            serialized: Mutex::new(None),
            gate,
            parent: Mutex::new(Weak::new()),
        }
    }

    /// Record for `op` at the current version.
    pub fn new(op: Box<dyn RedoOp>) -> Self {
        Self::build(op, Version::CURRENT, None)
    }

    /// Chained child record: starts with commit blocked until its parent
    /// commits (see [`LogRecord::attach_to_parent`]).
    pub fn chained(op: Box<dyn RedoOp>) -> Self {
        Self::build(op, Version::CURRENT, Some(CommitGate::new()))
    }

    /// Control record belonging to `target`'s transaction.
    pub fn control(op: Box<dyn RedoOp>, target: &LogRecord) -> Self {
        let mut rec = Self::build(op, Version::CURRENT, None);
        rec.header = RecordHeader {
            timestamp: zredo_core::now_millis(),
            change_id: -1,
            change_constraint: -1,
            txn_id: target.header.txn_id,
            mailbox_id: target.header.mailbox_id,
        };
        rec.mailbox_assigned = target.mailbox_assigned;
        rec
    }

    /// Log-level control record outside any transaction (checkpoint, rollover).
    pub fn standalone(op: Box<dyn RedoOp>) -> Self {
        let mut rec = Self::build(op, Version::CURRENT, None);
        rec.header.timestamp = zredo_core::now_millis();
        rec
    }

    // ========================================================================
    // Header
    // ========================================================================

    /// Variant tag
    pub fn opcode(&self) -> Opcode {
        self.op.opcode()
    }

    /// Format version of this record
    pub fn version(&self) -> Version {
        self.version
    }

    /// Common header
    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    /// Transaction id
    pub fn txn_id(&self) -> TransactionId {
        self.header.txn_id
    }

    /// Mailbox id
    pub fn mailbox_id(&self) -> MailboxId {
        self.header.mailbox_id
    }

    /// Operation timestamp (millis)
    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    /// The operation variant
    pub fn op(&self) -> &dyn RedoOp {
        self.op.as_ref()
    }

    /// Downcast the operation to a concrete variant
    pub fn op_as<T: RedoOp>(&self) -> Option<&T> {
        self.op.as_any().downcast_ref::<T>()
    }

    /// True if this record begins a transaction
    pub fn is_start_marker(&self) -> bool {
        self.opcode().is_start_marker()
    }

    /// Assign the mailbox. Allowed once; repeating the same value is fine.
    pub fn set_mailbox_id(&mut self, mailbox: MailboxId) -> Result<(), RedoError> {
        if self.mailbox_assigned && self.header.mailbox_id != mailbox {
            return Err(RedoError::MailboxAlreadySet {
                current: self.header.mailbox_id,
                requested: mailbox,
            });
        }
        self.header.mailbox_id = mailbox;
        self.mailbox_assigned = true;
        Ok(())
    }

    /// Set the change id and change constraint.
    pub fn set_change(&mut self, change_id: i32, change_constraint: i32) {
        self.header.change_id = change_id;
        self.header.change_constraint = change_constraint;
    }

    /// Encode at an older version (backward path). Fields newer than
    /// `version` are omitted when the record is written.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
        *self.serialized.lock() = None;
    }

    /// Stamp the timestamp and, for start markers, allocate a transaction id.
    pub fn start(&mut self, log: &dyn RedoLog, timestamp: i64) {
        self.header.timestamp = timestamp;
        if self.is_start_marker() {
            self.header.txn_id = log.next_txn_id();
        }
    }

    /// Set when the record was produced by replay rather than by a caller.
    pub fn set_unlogged_replay(&self, value: bool) {
        self.unlogged_replay.store(value, Ordering::Release);
    }

    /// True for records being replayed
    pub fn is_unlogged_replay(&self) -> bool {
        self.unlogged_replay.load(Ordering::Acquire)
    }

    /// True if the operation may be replayed after service resumes
    pub fn defer_crash_recovery(&self) -> bool {
        self.op.defer_crash_recovery()
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Primary bytes at an explicit version (no side-channel content).
    pub fn encode_at(&self, version: Version) -> Result<Vec<u8>, CodecError> {
        let mut out = RedoOutput::new(version);
        Preamble {
            version,
            opcode: self.opcode(),
        }
        .encode(&mut out);
        self.header.encode(&mut out)?;
        self.op.encode_payload(&mut out)?;
        if let Some(blob) = self.op.blob() {
            blob.encode_declaration(&mut out)?;
        }
        Ok(out.into_bytes())
    }

    /// Cached primary bytes at the record's version.
    pub fn serialized_bytes(&self) -> Result<Arc<[u8]>, CodecError> {
        let mut cache = self.serialized.lock();
        if let Some(bytes) = cache.as_ref() {
            return Ok(Arc::clone(bytes));
        }
        let bytes: Arc<[u8]> = self.encode_at(self.version)?.into();
        *cache = Some(Arc::clone(&bytes));
        Ok(bytes)
    }

    /// True while primary bytes are cached
    pub fn has_serialized_cache(&self) -> bool {
        self.serialized.lock().is_some()
    }

    /// Drop the cached primary bytes.
    pub fn clear_serialized(&self) {
        *self.serialized.lock() = None;
    }

    /// Side-channel length (0 without a blob)
    pub fn blob_len(&self) -> u64 {
        self.op.blob().map(|b| b.len()).unwrap_or(0)
    }

    /// Primary bytes plus a reader regenerating the side channel.
    #[allow(clippy::type_complexity)]
    pub fn output_stream(
        &self,
    ) -> Result<(Arc<[u8]>, Option<(Box<dyn Read + Send>, u64)>), LogError> {
        let primary = self.serialized_bytes()?;
        let side = match self.op.blob() {
            Some(blob) if !blob.is_empty() => Some((blob.open()?, blob.len())),
            _ => None,
        };
        Ok((primary, side))
    }

    /// Full record bytes with the side channel inlined.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LogError> {
        let (primary, side) = self.output_stream()?;
        let mut bytes = primary.to_vec();
        if let Some((mut reader, _)) = side {
            reader.read_to_end(&mut bytes)?;
        }
        Ok(bytes)
    }

    /// Decode a full record with default options.
    pub fn decode(bytes: &[u8], registry: &OpRegistry) -> Result<Self, CodecError> {
        Self::decode_with(bytes, registry, &DecodeOptions::default())
    }

    /// Decode a full record (primary bytes followed by side-channel bytes).
    pub fn decode_with(
        bytes: &[u8],
        registry: &OpRegistry,
        opts: &DecodeOptions,
    ) -> Result<Self, CodecError> {
        let mut input = RedoInput::new(bytes, Version::INITIAL);
        let preamble = Preamble::decode(&mut input, opts.max_version)?;
        let mut op = registry.create(preamble.opcode)?;
        let header = RecordHeader::decode(&mut input)?;
        op.decode_payload(&mut input)?;

        let has_blob = op.blob().is_some();
        if has_blob {
            let declared = crate::blob::Blob::decode_declaration(&mut input)?;
            let len = declared.len();
            let start = input.position();
            let content = input.take(len as usize)?;
            let source = match &opts.blob_origin {
                Some(origin) => BlobSource::FileRange {
                    path: origin.path.clone(),
                    offset: origin.offset + start as u64,
                    len,
                },
                None => BlobSource::Memory(content.into()),
            };
            if let Some(slot) = op.blob_mut() {
                *slot = declared;
                slot.attach(source);
            }
        }

        if input.remaining() != 0 {
            return Err(CodecError::corrupt(format!(
                "{} trailing bytes after opcode {} payload",
                input.remaining(),
                preamble.opcode
            )));
        }

        let mut rec = Self::build(op, preamble.version, None);
        rec.header = header;
        rec.mailbox_assigned = header.mailbox_id.is_set();
        Ok(rec)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Current lifecycle state
    pub fn state(&self) -> TxnState {
        TxnState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TxnState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Register a callback to run once this record's commit is durable.
    pub fn on_commit(&self, callback: impl FnOnce(&CommitInfo) + Send + 'static) {
        self.lifecycle.lock().callbacks.push(Box::new(callback));
    }

    /// Attach hooks to a commit record; the writer fires them once durable.
    pub fn add_hooks(&self, hooks: Vec<CommitHook>) {
        self.lifecycle.lock().hooks.extend(hooks);
    }

    /// Take the hooks for the writer.
    pub fn take_hooks(&self) -> Vec<CommitHook> {
        std::mem::take(&mut self.lifecycle.lock().hooks)
    }

    /// Hand the record to the log.
    ///
    /// Start markers become active once the append returns. A start marker
    /// aborted while its append was in flight gets its abort record here,
    /// since the abort itself saw nothing written yet.
    pub fn log(self: &Arc<Self>, log: &dyn RedoLog, sync: bool) -> Result<(), RedoError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(RedoError::Finished {
                txn_id: self.txn_id(),
                state,
            });
        }
        log.log(self, sync)?;
        if !self.is_start_marker() {
            return Ok(());
        }

        let _lc = self.lifecycle.lock();
        match self.state() {
            TxnState::Inactive => {
                self.set_state(TxnState::Active);
                Ok(())
            }
            TxnState::Aborted => {
                tracing::debug!(txn = %self.txn_id(), "Aborted during append; writing abort");
                log.abort(self)?;
                Err(RedoError::Finished {
                    txn_id: self.txn_id(),
                    state: TxnState::Aborted,
                })
            }
            _ => Ok(()),
        }
    }

    /// Commit the transaction and cascade into chained children.
    ///
    /// A chained child whose commit is not yet allowed only records the
    /// request; its parent's commit performs it.
    pub fn commit(self: &Arc<Self>, log: &dyn RedoLog) -> Result<(), RedoError> {
        let mut lc = self.lifecycle.lock();
        if !self.is_commit_allowed() {
            lc.commit_requested = true;
            tracing::trace!(txn = %self.txn_id(), "Chained commit held until parent commits");
            return Ok(());
        }
        if self.state() != TxnState::Active {
            return Ok(());
        }
        self.set_state(TxnState::Committed);
        lc.commit_requested = false;
        if let Err(e) = log.commit(self, &mut lc.callbacks) {
            self.set_state(TxnState::Active);
            return Err(e.into());
        }

        let children = std::mem::take(&mut lc.chained);
        for child in &children {
            child.allow_commit();
            if let Err(e) = child.commit(log) {
                tracing::error!(
                    parent = %self.txn_id(),
                    child = %child.txn_id(),
                    error = %e,
                    "Chained commit failed"
                );
            }
        }
        drop(lc);
        self.clear_serialized();
        Ok(())
    }

    /// Abort the transaction and cascade into chained children.
    ///
    /// A record that was never appended becomes `Aborted` without writing.
    pub fn abort(self: &Arc<Self>, log: &dyn RedoLog) -> Result<(), RedoError> {
        let mut lc = self.lifecycle.lock();
        match self.state() {
            TxnState::Committed | TxnState::Aborted => return Ok(()),
            TxnState::Inactive => self.set_state(TxnState::Aborted),
            TxnState::Active => {
                self.set_state(TxnState::Aborted);
                if let Err(e) = log.abort(self) {
                    self.set_state(TxnState::Active);
                    return Err(e.into());
                }
            }
        }
        lc.callbacks.clear();
        lc.commit_requested = false;

        let children = std::mem::take(&mut lc.chained);
        for child in &children {
            if let Err(e) = child.abort(log) {
                tracing::error!(
                    parent = %self.txn_id(),
                    child = %child.txn_id(),
                    error = %e,
                    "Chained abort failed"
                );
            }
        }
        drop(lc);
        self.clear_serialized();
        Ok(())
    }

    /// Register this record as a chained child of `parent`.
    ///
    /// If the parent has already committed the child is released and
    /// committed here; if it aborted, the child is aborted.
    pub fn attach_to_parent(
        self: &Arc<Self>,
        parent: &Arc<LogRecord>,
        log: &dyn RedoLog,
    ) -> Result<(), RedoError> {
        let mut plc = parent.lifecycle.lock();
        *self.parent.lock() = Arc::downgrade(parent);
        match parent.state() {
            TxnState::Inactive | TxnState::Active => {
                if !self.is_commit_allowed() {
                    plc.chained.push(Arc::clone(self));
                }
                Ok(())
            }
            TxnState::Committed => {
                self.allow_commit();
                self.commit(log)
            }
            TxnState::Aborted => self.abort(log),
        }
    }

    /// Parent this child was attached to, while it is alive
    pub fn parent(&self) -> Option<Arc<LogRecord>> {
        self.parent.lock().upgrade()
    }

    /// Number of chained children awaiting the cascade
    pub fn chained_count(&self) -> usize {
        self.lifecycle.lock().chained.len()
    }

    /// True unless this is a chained child still blocked on its parent
    pub fn is_commit_allowed(&self) -> bool {
        self.gate.as_ref().map(|g| g.is_allowed()).unwrap_or(true)
    }

    /// True if a commit was requested while it was not yet allowed
    pub fn is_commit_pending(&self) -> bool {
        self.lifecycle.lock().commit_requested
    }

    /// Release a chained child for commit.
    pub fn allow_commit(&self) {
        if let Some(gate) = &self.gate {
            gate.allow();
        }
    }

    /// Block until commit is allowed or `timeout` elapses.
    pub fn wait_commit_allowed(&self, timeout: Duration) -> bool {
        match &self.gate {
            Some(gate) => gate.wait(timeout),
            None => true,
        }
    }

    // ========================================================================
    // Replay
    // ========================================================================

    /// Context handed to the store when this record is replayed
    pub fn replay_context(&self) -> OperationContext {
        OperationContext {
            mailbox: self.header.mailbox_id,
            txn_id: self.header.txn_id,
            timestamp: self.header.timestamp,
            change_id: self.header.change_id,
            change_constraint: self.header.change_constraint,
            replay: true,
        }
    }

    /// Apply the operation to the store.
    pub fn redo(&self, store: &dyn MailboxStore) -> StoreResult<()> {
        self.op.redo(&self.replay_context(), store)
    }

    /// Blob carried by the operation
    pub fn blob(&self) -> Option<&Blob> {
        self.op.blob()
    }

    /// Copy a file-backed blob into memory so the record outlives the
    /// segment it was read from.
    pub fn detach_blob(&mut self) -> Result<(), crate::blob::BlobError> {
        if let Some(blob) = self.op.blob_mut() {
            if matches!(
                blob.source(),
                BlobSource::File(_) | BlobSource::FileRange { .. }
            ) {
                let stored = blob.load_stored()?;
                blob.attach(BlobSource::Memory(stored.into()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "txn {} [op {}] ver={} tsp={}",
            self.header.txn_id,
            self.opcode(),
            self.version,
            self.header.timestamp
        )?;
        if self.header.mailbox_id.is_set() {
            write!(f, " mailbox={}", self.header.mailbox_id)?;
        }
        if self.header.change_id >= 0 {
            write!(
                f,
                " change={}/{}",
                self.header.change_id, self.header.change_constraint
            )?;
        }
        let body = self.op.print_body();
        if !body.is_empty() {
            write!(f, ": {}", body)?;
        }
        Ok(())
    }
}

impl fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogRecord")
            .field("op", &self.op)
            .field("version", &self.version)
            .field("header", &self.header)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{note_registry, LogEvent, NoteOp, RecordingLog};
    use std::sync::atomic::AtomicUsize;

    fn started(log: &RecordingLog, text: &str) -> Arc<LogRecord> {
        let mut rec = LogRecord::new(Box::new(NoteOp::new(text)));
        rec.set_mailbox_id(MailboxId(7)).unwrap();
        rec.start(log, 1_000);
        Arc::new(rec)
    }

    fn chained_child(log: &RecordingLog, parent: &LogRecord) -> Arc<LogRecord> {
        let mut rec = LogRecord::chained(Box::new(NoteOp::new("index")));
        rec.set_mailbox_id(parent.mailbox_id()).unwrap();
        rec.start(log, 1_001);
        Arc::new(rec)
    }

    #[test]
    fn test_start_allocates_txn_only_for_start_markers() {
        let log = RecordingLog::new();
        let rec = started(&log, "a");
        assert!(!rec.txn_id().is_none());

        let commit = LogRecord::control(Box::new(crate::op::CommitTxn::new(rec.opcode())), &rec);
        assert_eq!(commit.txn_id(), rec.txn_id());
        assert_eq!(commit.mailbox_id(), MailboxId(7));
    }

    #[test]
    fn test_mailbox_assigned_once() {
        let mut rec = LogRecord::new(Box::new(NoteOp::new("a")));
        rec.set_mailbox_id(MailboxId(7)).unwrap();
        rec.set_mailbox_id(MailboxId(7)).unwrap();
        assert!(matches!(
            rec.set_mailbox_id(MailboxId(8)),
            Err(RedoError::MailboxAlreadySet { .. })
        ));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let log = RecordingLog::new();
        let rec = started(&log, "a");
        assert_eq!(rec.state(), TxnState::Inactive);
        rec.log(&log, false).unwrap();
        assert_eq!(rec.state(), TxnState::Active);
        assert!(rec.has_serialized_cache());
        rec.commit(&log).unwrap();
        assert_eq!(rec.state(), TxnState::Committed);
        assert!(!rec.has_serialized_cache());
        assert!(matches!(
            rec.log(&log, false),
            Err(RedoError::Finished { .. })
        ));
    }

    #[test]
    fn test_commit_is_idempotent() {
        let log = RecordingLog::new();
        let rec = started(&log, "a");
        rec.log(&log, false).unwrap();
        rec.commit(&log).unwrap();
        rec.commit(&log).unwrap();
        rec.abort(&log).unwrap();
        assert_eq!(log.commits(), vec![rec.txn_id()]);
        assert!(log.aborts().is_empty());
    }

    #[test]
    fn test_abort_is_idempotent() {
        let log = RecordingLog::new();
        let rec = started(&log, "a");
        rec.log(&log, false).unwrap();
        rec.abort(&log).unwrap();
        rec.abort(&log).unwrap();
        rec.commit(&log).unwrap();
        assert_eq!(log.aborts(), vec![rec.txn_id()]);
        assert!(log.commits().is_empty());
        assert_eq!(rec.state(), TxnState::Aborted);
    }

    #[test]
    fn test_abort_before_append_writes_nothing() {
        let log = RecordingLog::new();
        let rec = started(&log, "a");
        rec.abort(&log).unwrap();
        assert_eq!(rec.state(), TxnState::Aborted);
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_commit_of_inactive_is_noop() {
        let log = RecordingLog::new();
        let rec = started(&log, "a");
        rec.commit(&log).unwrap();
        assert_eq!(rec.state(), TxnState::Inactive);
        assert!(log.commits().is_empty());
    }

    #[test]
    fn test_commit_callback_receives_info() {
        let log = RecordingLog::new();
        let rec = started(&log, "a");
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let txn = rec.txn_id();
        rec.on_commit(move |info| {
            assert_eq!(info.txn_id, txn);
            assert_eq!(info.mailbox_id, MailboxId(7));
            f.fetch_add(1, Ordering::SeqCst);
        });
        rec.log(&log, false).unwrap();
        rec.commit(&log).unwrap();
        rec.commit(&log).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    /// Log whose first commit is refused.
    #[derive(Default)]
    struct CommitFailsOnce {
        inner: RecordingLog,
        refused: AtomicBool,
    }

    impl RedoLog for CommitFailsOnce {
        fn next_txn_id(&self) -> TransactionId {
            self.inner.next_txn_id()
        }

        fn log(&self, record: &Arc<LogRecord>, sync: bool) -> Result<(), LogError> {
            self.inner.log(record, sync)
        }

        fn commit(
            &self,
            record: &Arc<LogRecord>,
            callbacks: &mut Vec<CommitCallback>,
        ) -> Result<(), LogError> {
            if !self.refused.swap(true, Ordering::SeqCst) {
                return Err(LogError::Closed);
            }
            self.inner.commit(record, callbacks)
        }

        fn abort(&self, record: &Arc<LogRecord>) -> Result<(), LogError> {
            self.inner.abort(record)
        }
    }

    /// Log that aborts the record while its append is still in flight.
    #[derive(Default)]
    struct AbortDuringAppend {
        inner: RecordingLog,
    }

    impl RedoLog for AbortDuringAppend {
        fn next_txn_id(&self) -> TransactionId {
            self.inner.next_txn_id()
        }

        fn log(&self, record: &Arc<LogRecord>, sync: bool) -> Result<(), LogError> {
            self.inner.log(record, sync)?;
            record.abort(&self.inner).unwrap();
            Ok(())
        }

        fn commit(
            &self,
            record: &Arc<LogRecord>,
            callbacks: &mut Vec<CommitCallback>,
        ) -> Result<(), LogError> {
            self.inner.commit(record, callbacks)
        }

        fn abort(&self, record: &Arc<LogRecord>) -> Result<(), LogError> {
            self.inner.abort(record)
        }
    }

    #[test]
    fn test_failed_commit_keeps_callbacks_for_retry() {
        let log = CommitFailsOnce::default();
        let mut rec = LogRecord::new(Box::new(NoteOp::new("a")));
        rec.set_mailbox_id(MailboxId(7)).unwrap();
        rec.start(&log, 1_000);
        let rec = Arc::new(rec);

        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        rec.on_commit(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        rec.log(&log, false).unwrap();

        assert!(matches!(rec.commit(&log), Err(RedoError::Log(LogError::Closed))));
        assert_eq!(rec.state(), TxnState::Active);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        rec.commit(&log).unwrap();
        assert_eq!(rec.state(), TxnState::Committed);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(log.inner.commits(), vec![rec.txn_id()]);
    }

    #[test]
    fn test_abort_racing_append_writes_abort_record() {
        let log = AbortDuringAppend::default();
        let mut rec = LogRecord::new(Box::new(NoteOp::new("a")));
        rec.set_mailbox_id(MailboxId(7)).unwrap();
        rec.start(&log, 1_000);
        let rec = Arc::new(rec);

        assert!(matches!(
            rec.log(&log, false),
            Err(RedoError::Finished {
                state: TxnState::Aborted,
                ..
            })
        ));
        assert_eq!(rec.state(), TxnState::Aborted);
        let events = log.inner.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LogEvent::Append { txn_id, .. } if txn_id == rec.txn_id()));
        assert_eq!(events[1], LogEvent::Abort { txn_id: rec.txn_id() });
    }

    #[test]
    fn test_chained_child_commits_after_parent() {
        let log = RecordingLog::new();
        let parent = started(&log, "create");
        parent.log(&log, false).unwrap();
        let child = chained_child(&log, &parent);
        child.log(&log, false).unwrap();
        child.attach_to_parent(&parent, &log).unwrap();

        // Worker finishes first: commit is held
        child.commit(&log).unwrap();
        assert!(child.is_commit_pending());
        assert_eq!(child.state(), TxnState::Active);

        parent.commit(&log).unwrap();
        assert_eq!(child.state(), TxnState::Committed);
        assert_eq!(log.commits(), vec![parent.txn_id(), child.txn_id()]);
        assert!(!child.is_commit_pending());

        // Cascade already committed it
        child.commit(&log).unwrap();
        assert_eq!(log.commits().len(), 2);
    }

    #[test]
    fn test_attach_after_parent_committed() {
        let log = RecordingLog::new();
        let parent = started(&log, "create");
        parent.log(&log, false).unwrap();
        parent.commit(&log).unwrap();

        let child = chained_child(&log, &parent);
        child.log(&log, false).unwrap();
        child.attach_to_parent(&parent, &log).unwrap();
        assert!(child.is_commit_allowed());
        assert_eq!(child.state(), TxnState::Committed);
        assert_eq!(log.commits(), vec![parent.txn_id(), child.txn_id()]);
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &parent));
    }

    #[test]
    fn test_parent_abort_cascades() {
        let log = RecordingLog::new();
        let parent = started(&log, "create");
        parent.log(&log, false).unwrap();
        let child = chained_child(&log, &parent);
        child.log(&log, false).unwrap();
        child.attach_to_parent(&parent, &log).unwrap();
        parent.abort(&log).unwrap();
        assert_eq!(child.state(), TxnState::Aborted);
        assert_eq!(log.aborts(), vec![parent.txn_id(), child.txn_id()]);
    }

    #[test]
    fn test_attach_to_aborted_parent_aborts_child() {
        let log = RecordingLog::new();
        let parent = started(&log, "create");
        parent.log(&log, false).unwrap();
        parent.abort(&log).unwrap();
        let child = chained_child(&log, &parent);
        child.attach_to_parent(&parent, &log).unwrap();
        assert_eq!(child.state(), TxnState::Aborted);
    }

    #[test]
    fn test_child_allowed_before_attach_is_not_registered() {
        let log = RecordingLog::new();
        let parent = started(&log, "create");
        parent.log(&log, false).unwrap();
        let child = chained_child(&log, &parent);
        child.allow_commit();
        child.attach_to_parent(&parent, &log).unwrap();
        assert_eq!(parent.chained_count(), 0);
    }

    #[test]
    fn test_chained_order_under_races() {
        for _ in 0..50 {
            let log = Arc::new(RecordingLog::new());
            let parent = started(&log, "create");
            parent.log(log.as_ref(), false).unwrap();
            let child = chained_child(&log, &parent);
            child.log(log.as_ref(), false).unwrap();

            let worker = {
                let log = Arc::clone(&log);
                let child = Arc::clone(&child);
                let parent = Arc::clone(&parent);
                std::thread::spawn(move || {
                    child.attach_to_parent(&parent, log.as_ref()).unwrap();
                    child.commit(log.as_ref()).unwrap();
                })
            };
            parent.commit(log.as_ref()).unwrap();
            worker.join().unwrap();

            let commits = log.commits();
            assert_eq!(commits, vec![parent.txn_id(), child.txn_id()]);
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let log = RecordingLog::new();
        let mut rec = LogRecord::new(Box::new(NoteOp::new("hello")));
        rec.set_mailbox_id(MailboxId(9)).unwrap();
        rec.set_change(12, 11);
        rec.start(&log, 5_000);

        let bytes = rec.to_bytes().unwrap();
        let back = LogRecord::decode(&bytes, &note_registry()).unwrap();
        assert_eq!(back.header(), rec.header());
        assert_eq!(back.version(), Version::CURRENT);
        assert_eq!(back.op_as::<NoteOp>(), rec.op_as::<NoteOp>());
    }

    #[test]
    fn test_blob_rides_side_channel() {
        let log = RecordingLog::new();
        let op = NoteOp::new("with blob").with_blob(b"0123456789", false);
        let mut rec = LogRecord::new(Box::new(op));
        rec.start(&log, 1);

        let primary = rec.serialized_bytes().unwrap();
        let full = rec.to_bytes().unwrap();
        assert_eq!(full.len(), primary.len() + 10);
        assert_eq!(&full[primary.len()..], b"0123456789");

        let back = LogRecord::decode(&full, &note_registry()).unwrap();
        assert_eq!(back.blob().unwrap().load_raw().unwrap(), b"0123456789");
    }

    #[test]
    fn test_blob_origin_becomes_file_range() {
        let log = RecordingLog::new();
        let op = NoteOp::new("x").with_blob(b"abc", false);
        let mut rec = LogRecord::new(Box::new(op));
        rec.start(&log, 1);
        let full = rec.to_bytes().unwrap();

        let opts = DecodeOptions {
            blob_origin: Some(BlobOrigin {
                path: PathBuf::from("/seg"),
                offset: 100,
            }),
            ..DecodeOptions::default()
        };
        let back = LogRecord::decode_with(&full, &note_registry(), &opts).unwrap();
        match back.blob().unwrap().source() {
            BlobSource::FileRange { offset, len, .. } => {
                assert_eq!(*offset, 100 + (full.len() - 3) as u64);
                assert_eq!(*len, 3);
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_truncated_and_trailing_bytes() {
        let log = RecordingLog::new();
        let mut rec = LogRecord::new(Box::new(NoteOp::new("abc")));
        rec.start(&log, 1);
        let bytes = rec.to_bytes().unwrap();

        let err = LogRecord::decode(&bytes[..bytes.len() - 1], &note_registry()).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));

        let mut longer = bytes.clone();
        longer.push(0);
        let err = LogRecord::decode(&longer, &note_registry()).unwrap_err();
        assert!(matches!(err, CodecError::CorruptRecord(_)));
    }

    #[test]
    fn test_unknown_opcode_on_decode() {
        let log = RecordingLog::new();
        let mut rec = LogRecord::new(Box::new(NoteOp::new("abc")));
        rec.start(&log, 1);
        let bytes = rec.to_bytes().unwrap();
        let err = LogRecord::decode(&bytes, &OpRegistry::new()).unwrap_err();
        assert_eq!(err, CodecError::UnknownOpcode(NoteOp::OPCODE.0));
    }

    #[test]
    fn test_display() {
        let log = RecordingLog::new();
        let rec = started(&log, "hello");
        let s = rec.to_string();
        assert!(s.contains("mailbox=7"));
        assert!(s.contains("hello"));
    }

    #[test]
    fn test_events_in_order() {
        let log = RecordingLog::new();
        let rec = started(&log, "a");
        rec.log(&log, true).unwrap();
        rec.commit(&log).unwrap();
        assert_eq!(
            log.events(),
            vec![
                LogEvent::Append {
                    txn_id: rec.txn_id(),
                    opcode: NoteOp::OPCODE,
                    sync: true
                },
                LogEvent::Commit {
                    txn_id: rec.txn_id()
                },
            ]
        );
    }
}

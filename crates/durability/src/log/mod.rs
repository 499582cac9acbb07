//! Log manager and writers
//!
//! ```text
//! LogRecord ──▶ RedoLog (LogManager) ──▶ LogWriter (FileLogWriter | MemoryLogWriter)
//!                     │                        │
//!                     │                        └── segment frames, fsync, rollover copy
//!                     └── txn ids, active map, commit/abort records, rollover policy
//! ```
//!
//! - `manager`: [`LogManager`], the durability boundary records talk to
//! - `file`: segment-file writer with a background flusher
//! - `memory`: in-memory writer for tests and tools
//! - `reader`: sequential segment reader used by recovery
//! - `rollover`: archive naming, listing, and interrupted-rollover repair

pub mod file;
pub mod manager;
pub mod memory;
pub mod reader;
pub mod rollover;

use crate::blob::BlobError;
use crate::config::ConfigError;
use crate::format::CodecError;
use crate::recovery::RecoveryError;
use crate::txn::{CommitCallback, LogRecord};
use std::path::PathBuf;
use std::sync::Arc;
use zredo_core::TransactionId;

pub use file::FileLogWriter;
pub use manager::{LogManager, ManagerStats};
pub use memory::MemoryLogWriter;
pub use reader::{FrameScan, LogReadError, LogReader, ReadEntry, TruncateInfo};
pub use rollover::{RepairAction, RolloverManager};

/// Log errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// I/O failure on the log medium
    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized
    #[error("Record encoding failed: {0}")]
    Codec(#[from] CodecError),

    /// Side-channel content could not be read
    #[error("Blob side channel failed: {0}")]
    Blob(#[from] BlobError),

    /// Writer is not open
    #[error("Log is closed")]
    Closed,

    /// Complete frame with bad content found while opening for append
    #[error("Corrupt log {path:?} at offset {offset}")]
    Corrupt {
        /// Segment file
        path: PathBuf,
        /// Frame offset
        offset: u64,
    },

    /// Startup recovery failed
    #[error("Crash recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// What a record needs from the log it is written to.
pub trait RedoLog: Send + Sync {
    /// Allocate a transaction id for a new start marker.
    fn next_txn_id(&self) -> TransactionId;

    /// Append a finished record. With `sync` the call returns only once
    /// the record is durable.
    fn log(&self, record: &Arc<LogRecord>, sync: bool) -> Result<(), LogError>;

    /// Record that `record`'s transaction committed. `callbacks` run once
    /// the commit is durable.
    ///
    /// Callbacks are drained only when the commit is accepted; on error
    /// they are left in `callbacks`.
    fn commit(
        &self,
        record: &Arc<LogRecord>,
        callbacks: &mut Vec<CommitCallback>,
    ) -> Result<(), LogError>;

    /// Record that `record`'s transaction aborted.
    fn abort(&self, record: &Arc<LogRecord>) -> Result<(), LogError>;
}

/// Cumulative writer counters, never reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Records appended
    pub appends: u64,
    /// Bytes appended (framing included)
    pub bytes_written: u64,
    /// fsync calls
    pub sync_calls: u64,
    /// Nanoseconds spent in fsync
    pub sync_nanos: u64,
    /// Rollovers completed
    pub rollovers: u64,
}

/// Physical log medium.
///
/// Writers frame and persist records; they know nothing about
/// transactions beyond firing the commit hooks a record carries.
pub trait LogWriter: Send + Sync {
    /// Open (or create) the active segment, dropping any torn tail.
    fn open(&self) -> Result<(), LogError>;

    /// Flush and close.
    fn close(&self) -> Result<(), LogError>;

    /// Append a record. With `sync` the record and everything before it is
    /// durable on return.
    fn log(&self, record: &LogRecord, sync: bool) -> Result<(), LogError>;

    /// Make every appended record durable.
    fn flush(&self) -> Result<(), LogError>;

    /// Size of the active segment in bytes
    fn size(&self) -> u64;

    /// Size of the active segment when it was opened
    fn opened_size(&self) -> u64;

    /// Creation time of the active segment (millis)
    fn create_time(&self) -> i64;

    /// Sequence number of the active segment
    fn sequence(&self) -> u64;

    /// True if the active segment holds no records
    fn is_empty(&self) -> bool;

    /// Close the active segment, archive it, and start the next one with
    /// `carry` re-appended. Returns where the old segment went.
    fn rollover(&self, carry: &[Arc<LogRecord>]) -> Result<Option<PathBuf>, LogError>;

    /// Counters
    fn stats(&self) -> WriterStats;
}

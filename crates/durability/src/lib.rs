//! Redo log for a mailbox store
//!
//! Every mutating mailbox operation is captured as a versioned, self-describing
//! [`LogRecord`], appended to a durable log, and replayed after a crash.
//!
//! - `format`: big-endian envelope codec and the segment file layout
//! - `op`: the [`RedoOp`] trait, control records, and the [`OpRegistry`]
//! - `txn`: record lifecycle (start/log/commit/abort) and chained children
//! - `blob`: side-channel payloads that travel after the primary bytes
//! - `log`: [`LogManager`], file and memory writers, reader, rollover
//! - `recovery`: [`RedoPlayer`] and crash recovery
//! - `config`: [`RedoConfig`]
//! - `testing`: test doubles shared by this crate's tests and downstream crates

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod config;
pub mod format;
pub mod log;
pub mod op;
pub mod recovery;
pub mod testing;
pub mod txn;

pub use blob::{Blob, BlobError, BlobSource};
pub use config::{ConfigError, RedoConfig};
pub use format::{CodecError, RedoInput, RedoOutput};
pub use log::{
    FileLogWriter, LogError, LogManager, LogReadError, LogReader, LogWriter, ManagerStats,
    MemoryLogWriter, ReadEntry, RedoLog, TruncateInfo,
};
pub use op::{OpRegistry, OpTable, Opcode, RedoOp, RegistryError};
pub use recovery::{
    FailurePolicy, RecoveryError, RecoveryReport, RedoPlayer, ReplayPolicy, ReplayStats,
};
pub use txn::{CommitInfo, LogRecord, RedoError, TxnState};

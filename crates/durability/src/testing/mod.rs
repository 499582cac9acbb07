//! Test doubles for the redo log
//!
//! - [`NoteOp`]: a minimal start-marker variant with an optional blob and
//!   a configurable deferred-recovery flag
//! - [`RecordingLog`]: a [`crate::RedoLog`] that records what it was told,
//!   in order, and fires commit callbacks immediately
//! - [`RecordingStore`]: a [`zredo_core::MailboxStore`] that tracks the
//!   items `NoteOp` creates and reports idempotent outcomes the way a real
//!   store does
//!
//! # Example
//!
//! ```ignore
//! use zredo_durability::testing::{note_registry, NoteOp, RecordingLog};
//!
//! let log = RecordingLog::new();
//! let mut rec = LogRecord::new(Box::new(NoteOp::new("hello")));
//! rec.start(&log, 1_000);
//! ```

mod note_op;
mod recording;

pub use note_op::{note_registry, NoteOp};
pub use recording::{LogEvent, RecordingLog, RecordingStore};

//! Operation variant model
//!
//! Every record in the log is one operation variant identified by an
//! [`Opcode`]. Opcodes are organized by ranges:
//!
//! | Range | Kind | Description |
//! |-------|------|-------------|
//! | 0..=9 | Control | Commit, abort, checkpoint, rollover marker |
//! | 10..  | Start marker | Mailbox operations; each begins a transaction |
//!
//! Variants are plain structs implementing [`RedoOp`]. They are produced at
//! decode time by an [`OpRegistry`] from their opcode, default-constructed,
//! and then filled in by [`RedoOp::decode_payload`].

pub mod control;
pub mod registry;

use crate::blob::Blob;
use crate::format::{CodecError, RedoInput, RedoOutput};
use std::any::Any;
use std::fmt;
use zredo_core::{MailboxStore, OperationContext, StoreResult};

pub use control::{AbortTxn, Checkpoint, CommitTxn, Rollover};
pub use registry::{OpEntry, OpFactory, OpRegistry, OpTable, RegistryError};

/// Numeric tag identifying an operation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Opcode(pub i32);

impl Opcode {
    /// Open-transactions snapshot written at rollover
    pub const CHECKPOINT: Opcode = Opcode(1);
    /// Commit of a transaction
    pub const COMMIT_TXN: Opcode = Opcode(2);
    /// Abort of a transaction
    pub const ABORT_TXN: Opcode = Opcode(3);
    /// Segment rollover marker
    pub const ROLLOVER: Opcode = Opcode(4);

    /// Highest opcode of the control range
    pub const MAX_CONTROL: i32 = 9;

    /// True for control records (commit, abort, checkpoint, rollover).
    pub fn is_control(self) -> bool {
        (0..=Self::MAX_CONTROL).contains(&self.0)
    }

    /// True for records that begin a new transaction.
    pub fn is_start_marker(self) -> bool {
        !self.is_control()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Behaviour every operation variant supplies.
///
/// `encode_payload` and `decode_payload` must gate optional fields on the
/// same [`zredo_core::gates`] constant so a stream written at any supported
/// version reads back without misalignment.
pub trait RedoOp: Any + Send + Sync + fmt::Debug {
    /// Variant tag
    fn opcode(&self) -> Opcode;

    /// Human-readable field summary (diagnostics only)
    fn print_body(&self) -> String;

    /// Write the variant payload at `out.version()`.
    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError>;

    /// Read the variant payload at `input.version()`.
    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError>;

    /// Apply the operation to the mailbox store.
    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()>;

    /// Long-running operations that may be replayed after service resumes.
    fn defer_crash_recovery(&self) -> bool {
        false
    }

    /// Side-channel payload, if the variant carries one
    fn blob(&self) -> Option<&Blob> {
        None
    }

    /// Mutable access to the side-channel payload
    fn blob_mut(&mut self) -> Option<&mut Blob> {
        None
    }

    /// Downcast support
    fn as_any(&self) -> &dyn Any;
}

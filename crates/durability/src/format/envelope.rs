//! Record envelope
//!
//! ```text
//! ┌──────────────┬───────────────┬────────────┐
//! │ MAGIC (6)    │ VERSION (4)   │ OPCODE (4) │   preamble, version-independent
//! ├──────────────┴───────────────┴────────────┤
//! │ TIMESTAMP i64 | CHANGE_ID i32 |           │
//! │ CHANGE_CONSTRAINT i32 | TXN_ID (8) |      │   header
//! │ MAILBOX_ID (i32 before 1.2, i64 after)    │
//! ├───────────────────────────────────────────┤
//! │ variant payload [| side channel bytes]    │
//! └───────────────────────────────────────────┘
//! ```
//!
//! The preamble is enough to pick a variant; everything after it is read at
//! the version the preamble declares.

use super::wire::{CodecError, RedoInput, RedoOutput};
use crate::op::Opcode;
use zredo_core::{MailboxId, TransactionId, Version};

/// Marker that opens every record
pub const MAGIC: [u8; 6] = *b"ZMREDO";

/// Size of the preamble (magic + version + opcode)
pub const PREAMBLE_SIZE: usize = 6 + 4 + 4;

/// Version-independent start of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    /// Version the rest of the record was written at
    pub version: Version,
    /// Variant tag
    pub opcode: Opcode,
}

impl Preamble {
    /// Write magic, version and opcode.
    pub fn encode(&self, out: &mut RedoOutput) {
        out.write_raw(&MAGIC);
        out.write_raw(&self.version.to_bytes());
        out.write_i32(self.opcode.0);
    }

    /// Read and validate the preamble.
    ///
    /// The magic must match exactly and the version must not exceed
    /// `max_known`. On success the input is switched to the declared version.
    pub fn decode(input: &mut RedoInput<'_>, max_known: Version) -> Result<Self, CodecError> {
        let magic = input.take(MAGIC.len())?;
        if magic != MAGIC {
            return Err(CodecError::corrupt(format!(
                "bad magic marker {:02x?}",
                magic
            )));
        }
        let mut vbytes = [0u8; 4];
        vbytes.copy_from_slice(input.take(4)?);
        let version = Version::from_bytes(vbytes);
        version.check_supported(max_known)?;
        input.set_version(version);
        let opcode = Opcode(input.read_i32()?);
        Ok(Preamble { version, opcode })
    }

    /// Peek at the preamble of a serialized record without consuming it.
    pub fn peek(bytes: &[u8], max_known: Version) -> Result<Self, CodecError> {
        let mut input = RedoInput::new(bytes, Version::INITIAL);
        Self::decode(&mut input, max_known)
    }
}

/// Common header shared by every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Wall-clock time of the operation (millis)
    pub timestamp: i64,
    /// Change id assigned by the operation (-1 if none)
    pub change_id: i32,
    /// Last-known change id of the target (-1 for no constraint)
    pub change_constraint: i32,
    /// Owning transaction
    pub txn_id: TransactionId,
    /// Target mailbox
    pub mailbox_id: MailboxId,
}

impl Default for RecordHeader {
    fn default() -> Self {
        RecordHeader {
            timestamp: 0,
            change_id: -1,
            change_constraint: -1,
            txn_id: TransactionId::NONE,
            mailbox_id: MailboxId::UNSET,
        }
    }
}

impl RecordHeader {
    /// Encode at the output's version.
    pub fn encode(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i64(self.timestamp);
        out.write_i32(self.change_id);
        out.write_i32(self.change_constraint);
        out.write_txn_id(self.txn_id);
        out.write_mailbox_id(self.mailbox_id)
    }

    /// Decode at the input's version.
    pub fn decode(input: &mut RedoInput<'_>) -> Result<Self, CodecError> {
        Ok(RecordHeader {
            timestamp: input.read_i64()?,
            change_id: input.read_i32()?,
            change_constraint: input.read_i32()?,
            txn_id: input.read_txn_id()?,
            mailbox_id: input.read_mailbox_id()?,
        })
    }
}

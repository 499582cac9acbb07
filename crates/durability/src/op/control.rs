//! Control records
//!
//! Control records never start a transaction: commit and abort close the
//! transaction they name, checkpoint and rollover describe the log itself.
//! Replaying any of them against a mailbox store is a no-op.

use super::{Opcode, RedoOp};
use crate::format::{CodecError, RedoInput, RedoOutput};
use std::any::Any;
use zredo_core::{MailboxStore, OperationContext, StoreResult, TransactionId};

/// Marks a transaction committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitTxn {
    /// Opcode of the record being committed (diagnostics only)
    pub committed_opcode: i32,
}

impl CommitTxn {
    /// Commit record for a transaction started by `opcode`
    pub fn new(opcode: Opcode) -> Self {
        CommitTxn {
            committed_opcode: opcode.0,
        }
    }
}

impl RedoOp for CommitTxn {
    fn opcode(&self) -> Opcode {
        Opcode::COMMIT_TXN
    }

    fn print_body(&self) -> String {
        format!("committed_opcode={}", self.committed_opcode)
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32(self.committed_opcode);
        Ok(())
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.committed_opcode = input.read_i32()?;
        Ok(())
    }

    fn redo(&self, _ctx: &OperationContext, _store: &dyn MailboxStore) -> StoreResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marks a transaction aborted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbortTxn {
    /// Opcode of the record being aborted (diagnostics only)
    pub aborted_opcode: i32,
}

impl AbortTxn {
    /// Abort record for a transaction started by `opcode`
    pub fn new(opcode: Opcode) -> Self {
        AbortTxn {
            aborted_opcode: opcode.0,
        }
    }
}

impl RedoOp for AbortTxn {
    fn opcode(&self) -> Opcode {
        Opcode::ABORT_TXN
    }

    fn print_body(&self) -> String {
        format!("aborted_opcode={}", self.aborted_opcode)
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32(self.aborted_opcode);
        Ok(())
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.aborted_opcode = input.read_i32()?;
        Ok(())
    }

    fn redo(&self, _ctx: &OperationContext, _store: &dyn MailboxStore) -> StoreResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Transactions still open when a segment was closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Open transaction ids, ascending
    pub active_txns: Vec<TransactionId>,
}

impl Checkpoint {
    /// Checkpoint over the given open transactions
    pub fn new(mut active_txns: Vec<TransactionId>) -> Self {
        active_txns.sort();
        Checkpoint { active_txns }
    }
}

impl RedoOp for Checkpoint {
    fn opcode(&self) -> Opcode {
        Opcode::CHECKPOINT
    }

    fn print_body(&self) -> String {
        let ids: Vec<String> = self.active_txns.iter().map(|t| t.to_string()).collect();
        format!("active=[{}]", ids.join(", "))
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        let count = i32::try_from(self.active_txns.len())
            .map_err(|_| CodecError::corrupt("too many active transactions"))?;
        out.write_i32(count);
        for id in &self.active_txns {
            out.write_txn_id(*id);
        }
        Ok(())
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        let count = input.read_count()?;
        let mut ids = Vec::with_capacity(count.min(input.remaining() / 8));
        for _ in 0..count {
            ids.push(input.read_txn_id()?);
        }
        self.active_txns = ids;
        Ok(())
    }

    fn redo(&self, _ctx: &OperationContext, _store: &dyn MailboxStore) -> StoreResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Last record of a segment before it is archived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rollover {
    /// Sequence number of the segment being closed
    pub sequence: u64,
    /// File name the segment is archived under
    pub segment_name: String,
}

impl Rollover {
    /// Rollover marker for segment `sequence`
    pub fn new(sequence: u64, segment_name: impl Into<String>) -> Self {
        Rollover {
            sequence,
            segment_name: segment_name.into(),
        }
    }
}

impl RedoOp for Rollover {
    fn opcode(&self) -> Opcode {
        Opcode::ROLLOVER
    }

    fn print_body(&self) -> String {
        format!("seq={}, file={}", self.sequence, self.segment_name)
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_u64(self.sequence);
        out.write_str(&self.segment_name)
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.sequence = input.read_u64()?;
        self.segment_name = input.read_str()?;
        Ok(())
    }

    fn redo(&self, _ctx: &OperationContext, _store: &dyn MailboxStore) -> StoreResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

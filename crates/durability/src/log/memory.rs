//! In-memory log writer.
//!
//! Keeps full record bytes (side channel inlined) per segment. Every append
//! counts as durable, so commit hooks fire on the calling thread.

use super::{LogError, LogWriter, WriterStats};
use crate::format::{CodecError, FRAME_OVERHEAD, SEGMENT_HEADER_SIZE};
use crate::op::OpRegistry;
use crate::txn::LogRecord;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
    open: bool,
    sequence: u64,
    create_time: i64,
    frames: Vec<Vec<u8>>,
    archived: Vec<(u64, Vec<Vec<u8>>)>,
    opened_size: u64,
    stats: WriterStats,
}

impl MemoryState {
    fn size(&self) -> u64 {
        SEGMENT_HEADER_SIZE as u64
            + self
                .frames
                .iter()
                .map(|f| f.len() as u64 + FRAME_OVERHEAD as u64)
                .sum::<u64>()
    }
}

/// Log writer holding segments in memory.
#[derive(Debug, Default)]
pub struct MemoryLogWriter {
    state: Mutex<MemoryState>,
}

impl MemoryLogWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes of each record in the active segment
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.clone()
    }

    /// Decode the active segment.
    pub fn records(&self, registry: &OpRegistry) -> Result<Vec<LogRecord>, CodecError> {
        let frames = self.frames();
        frames
            .iter()
            .map(|bytes| LogRecord::decode(bytes, registry))
            .collect()
    }

    /// Decode an archived segment by sequence.
    pub fn archived_records(
        &self,
        sequence: u64,
        registry: &OpRegistry,
    ) -> Result<Vec<LogRecord>, CodecError> {
        let frames = self
            .state
            .lock()
            .archived
            .iter()
            .find(|(seq, _)| *seq == sequence)
            .map(|(_, frames)| frames.clone())
            .unwrap_or_default();
        frames
            .iter()
            .map(|bytes| LogRecord::decode(bytes, registry))
            .collect()
    }

    /// Sequences of archived segments, oldest first
    pub fn archived_sequences(&self) -> Vec<u64> {
        self.state.lock().archived.iter().map(|(seq, _)| *seq).collect()
    }
}

impl LogWriter for MemoryLogWriter {
    fn open(&self) -> Result<(), LogError> {
        let mut state = self.state.lock();
        if !state.open {
            state.open = true;
            if state.sequence == 0 {
                state.sequence = 1;
                state.create_time = zredo_core::now_millis();
            }
            state.opened_size = state.size();
        }
        Ok(())
    }

    fn close(&self) -> Result<(), LogError> {
        self.state.lock().open = false;
        Ok(())
    }

    fn log(&self, record: &LogRecord, _sync: bool) -> Result<(), LogError> {
        let bytes = record.to_bytes()?;
        {
            let mut state = self.state.lock();
            if !state.open {
                return Err(LogError::Closed);
            }
            state.stats.appends += 1;
            state.stats.bytes_written += bytes.len() as u64 + FRAME_OVERHEAD as u64;
            state.frames.push(bytes);
        }
        for hook in record.take_hooks() {
            hook.fire();
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), LogError> {
        Ok(())
    }

    fn size(&self) -> u64 {
        self.state.lock().size()
    }

    fn opened_size(&self) -> u64 {
        self.state.lock().opened_size
    }

    fn create_time(&self) -> i64 {
        self.state.lock().create_time
    }

    fn sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }

    fn rollover(&self, carry: &[Arc<LogRecord>]) -> Result<Option<PathBuf>, LogError> {
        let carried = carry
            .iter()
            .map(|r| r.to_bytes())
            .collect::<Result<Vec<_>, _>>()?;
        let mut state = self.state.lock();
        if !state.open {
            return Err(LogError::Closed);
        }
        let old = std::mem::replace(&mut state.frames, carried);
        let sequence = state.sequence;
        state.archived.push((sequence, old));
        state.sequence = sequence + 1;
        state.create_time = zredo_core::now_millis();
        state.opened_size = state.size();
        state.stats.rollovers += 1;
        Ok(None)
    }

    fn stats(&self) -> WriterStats {
        self.state.lock().stats.clone()
    }
}

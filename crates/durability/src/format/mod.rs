//! On-disk byte formats for redo records and log segments.
//!
//! Serialization lives here, apart from the operational code that decides
//! when records are written and how segments roll over.
//!
//! # Module Structure
//!
//! - `wire`: big-endian field codec shared by the envelope and the variants
//! - `envelope`: magic, version, opcode and common record header
//! - `segment`: segment header and CRC frames

pub mod envelope;
pub mod segment;
pub mod wire;

pub use envelope::{Preamble, RecordHeader, MAGIC, PREAMBLE_SIZE};
pub use segment::{
    compute_crc, frame_bytes, parse_frame, FrameParse, LogSegment, SegmentHeader, FRAME_OVERHEAD,
    SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
};
pub use wire::{CodecError, RedoInput, RedoOutput};

//! Sequential segment reader for recovery and tools.
//!
//! The reader walks frames in order and stops at the first incomplete one:
//! a frame that runs past end-of-file is the expected shape of a crash in
//! the middle of a write, reported through [`TruncateInfo`] rather than as an
//! error. A complete frame whose checksum fails or whose envelope does not
//! decode is corruption and is returned as [`LogReadError`].

use crate::format::{CodecError, SegmentHeader, FRAME_OVERHEAD, SEGMENT_HEADER_SIZE};
use crate::op::OpRegistry;
use crate::txn::{BlobOrigin, DecodeOptions, LogRecord};
use crc32fast::Hasher;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use zredo_core::Version;

/// One decoded record and where it was found.
#[derive(Debug)]
pub struct ReadEntry {
    /// Decoded record
    pub record: LogRecord,
    /// File offset of the frame
    pub offset: u64,
    /// Frame length including framing
    pub frame_len: u64,
}

/// Information about a segment with a torn tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TruncateInfo {
    /// Segment file
    pub path: PathBuf,

    /// Position where valid data ends
    pub valid_end: u64,

    /// Original file size
    pub original_size: u64,
}

impl TruncateInfo {
    /// Get the number of bytes that need to be truncated.
    pub fn bytes_to_truncate(&self) -> u64 {
        self.original_size - self.valid_end
    }
}

/// Frame-level scan result (no record decoding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameScan {
    /// Segment header, if the file holds a complete one
    pub header: Option<SegmentHeader>,
    /// Complete, checksummed frames
    pub frames: usize,
    /// End of the last complete frame
    pub valid_end: u64,
    /// File size
    pub file_len: u64,
    /// Offset of the first complete frame with a bad checksum
    pub corrupt_at: Option<u64>,
}

/// Reader errors.
#[derive(Debug, thiserror::Error)]
pub enum LogReadError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad checksum, bad header, or undecodable envelope in a complete frame
    #[error("Corrupt log {path:?} at offset {offset}: {detail}")]
    Corrupt {
        /// Segment file
        path: PathBuf,
        /// Frame offset
        offset: u64,
        /// What was wrong
        detail: String,
    },

    /// Record declares a version this build does not understand
    #[error("Unsupported version {found} in {path:?} at offset {offset} (highest known {max_known})")]
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

    /// No variant registered for the record's opcode
    #[error("Unknown opcode {opcode} in {path:?} at offset {offset}")]
    UnknownOpcode {
        /// Segment file
        path: PathBuf,
        /// Frame offset
        offset: u64,
        /// Opcode found
        opcode: i32,
    },
}

enum FrameRead {
    Body { offset: u64, body: Vec<u8> },
    End,
    Torn,
    BadChecksum { offset: u64, expected: u32, computed: u32 },
}

/// Sequential reader over one segment file.
pub struct LogReader<'r> {
    path: PathBuf,
    file: Option<BufReader<File>>,
    header: Option<SegmentHeader>,
    offset: u64,
    file_len: u64,
    registry: &'r OpRegistry,
    max_version: Version,
    truncated: Option<TruncateInfo>,
    done: bool,
}

impl<'r> LogReader<'r> {
    /// Open a segment for reading.
    pub fn open(path: &Path, registry: &'r OpRegistry) -> Result<Self, LogReadError> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let header = SegmentHeader::read_from(&mut file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                LogReadError::Corrupt {
                    path: path.to_path_buf(),
                    offset: 0,
                    detail: e.to_string(),
                }
            } else {
                LogReadError::Io(e)
            }
        })?;

        let mut reader = LogReader {
            path: path.to_path_buf(),
            file: None,
            header,
            offset: SEGMENT_HEADER_SIZE as u64,
            file_len,
            registry,
            max_version: Version::CURRENT,
            truncated: None,
            done: false,
        };

        if header.is_none() {
            // Crash while the header itself was being written.
            reader.offset = 0;
            reader.done = true;
            if file_len > 0 {
                reader.truncated = Some(TruncateInfo {
                    path: path.to_path_buf(),
                    valid_end: 0,
                    original_size: file_len,
                });
            }
        } else {
            reader.file = Some(BufReader::new(file));
        }
        Ok(reader)
    }

    /// Reject records newer than `version`.
    pub fn with_max_version(mut self, version: Version) -> Self {
        self.max_version = version;
        self
    }

    /// Segment header (None for a file shorter than a header)
    pub fn header(&self) -> Option<&SegmentHeader> {
        self.header.as_ref()
    }

    /// Segment file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just past the last complete frame read so far
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    /// Torn tail found while reading, if any
    pub fn truncate_info(&self) -> Option<&TruncateInfo> {
        self.truncated.as_ref()
    }

    fn fill(file: &mut BufReader<File>, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn read_frame(&mut self) -> std::io::Result<FrameRead> {
        let file = match self.file.as_mut() {
            Some(f) => f,
            None => return Ok(FrameRead::End),
        };
        let offset = self.offset;

        let mut len_bytes = [0u8; 4];
        match Self::fill(file, &mut len_bytes)? {
            0 => return Ok(FrameRead::End),
            4 => {}
            _ => return Ok(FrameRead::Torn),
        }
        let len = u32::from_le_bytes(len_bytes) as u64;
        if offset + len + FRAME_OVERHEAD as u64 > self.file_len {
            return Ok(FrameRead::Torn);
        }

        let mut body = vec![0u8; len as usize];
        if Self::fill(file, &mut body)? < body.len() {
            return Ok(FrameRead::Torn);
        }
        let mut crc_bytes = [0u8; 4];
        if Self::fill(file, &mut crc_bytes)? < 4 {
            return Ok(FrameRead::Torn);
        }

        let expected = u32::from_le_bytes(crc_bytes);
        let mut hasher = Hasher::new();
        hasher.update(&body);
        let computed = hasher.finalize();
        if expected != computed {
            return Ok(FrameRead::BadChecksum {
                offset,
                expected,
                computed,
            });
        }

        self.offset = offset + len + FRAME_OVERHEAD as u64;
        Ok(FrameRead::Body { offset, body })
    }

    fn mark_torn(&mut self) {
        self.done = true;
        let info = TruncateInfo {
            path: self.path.clone(),
            valid_end: self.offset,
            original_size: self.file_len,
        };
        tracing::warn!(
            path = ?self.path,
            valid_end = info.valid_end,
            bytes = info.bytes_to_truncate(),
            "Torn record at end of log"
        );
        self.truncated = Some(info);
    }

    fn codec_error(&self, offset: u64, e: CodecError) -> LogReadError {
        match e {
            CodecError::UnsupportedVersion { found, max_known } => {
                LogReadError::UnsupportedVersion {
                    path: self.path.clone(),
                    offset,
                    found,
                    max_known,
                }
            }
            CodecError::UnknownOpcode(opcode) => LogReadError::UnknownOpcode {
                path: self.path.clone(),
                offset,
                opcode,
            },
            other => LogReadError::Corrupt {
                path: self.path.clone(),
                offset,
                detail: other.to_string(),
            },
        }
    }

    /// Read the next record. `Ok(None)` at end of data or at a torn tail.
    pub fn next_record(&mut self) -> Result<Option<ReadEntry>, LogReadError> {
        if self.done {
            return Ok(None);
        }
        match self.read_frame()? {
            FrameRead::End => {
                self.done = true;
                Ok(None)
            }
            FrameRead::Torn => {
                self.mark_torn();
                Ok(None)
            }
            FrameRead::BadChecksum {
                offset,
                expected,
                computed,
            } => {
                self.done = true;
                Err(LogReadError::Corrupt {
                    path: self.path.clone(),
                    offset,
                    detail: format!(
                        "checksum mismatch: stored {:08x}, computed {:08x}",
                        expected, computed
                    ),
                })
            }
            FrameRead::Body { offset, body } => {
                let opts = DecodeOptions {
                    max_version: self.max_version,
                    blob_origin: Some(BlobOrigin {
                        path: self.path.clone(),
                        offset: offset + 4,
                    }),
                };
                match LogRecord::decode_with(&body, self.registry, &opts) {
                    Ok(record) => Ok(Some(ReadEntry {
                        record,
                        offset,
                        frame_len: body.len() as u64 + FRAME_OVERHEAD as u64,
                    })),
                    Err(e) => {
                        self.done = true;
                        Err(self.codec_error(offset, e))
                    }
                }
            }
        }
    }

    /// Read every remaining record.
    pub fn read_all(mut self) -> Result<(Vec<ReadEntry>, Option<TruncateInfo>), LogReadError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_record()? {
            entries.push(entry);
        }
        Ok((entries, self.truncated))
    }

    /// Check frames and checksums without decoding records.
    pub fn scan(path: &Path) -> Result<FrameScan, LogReadError> {
        let registry = OpRegistry::new();
        let mut reader = LogReader::open(path, &registry)?;
        let mut frames = 0;
        let mut corrupt_at = None;
        loop {
            match reader.read_frame()? {
                FrameRead::Body { .. } => frames += 1,
                FrameRead::End | FrameRead::Torn => break,
                FrameRead::BadChecksum { offset, .. } => {
                    corrupt_at = Some(offset);
                    break;
                }
            }
        }
        Ok(FrameScan {
            header: reader.header,
            frames,
            valid_end: reader.offset,
            file_len: reader.file_len,
            corrupt_at,
        })
    }
}

impl Iterator for LogReader<'_> {
    type Item = Result<ReadEntry, LogReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

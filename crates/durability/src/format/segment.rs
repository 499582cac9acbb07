//! Redo log segment file and frame format.
//!
//! The active segment is `redo.log`; archived segments are
//! `redo-NNNNNN.log` where `NNNNNN` is the zero-padded sequence number.
//!
//! # Segment Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Segment Header (40 bytes)          │
//! ├────────────────────────────────────┤
//! │ Frame 1                            │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Frame Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Envelope + side channel (Length)     │ CRC32 (4)│
//! └─────────────────┴──────────────────────────────────────┴──────────┘
//! ```
//!
//! Length and CRC are little-endian. The CRC covers the body only.

use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a redo segment file: "ZRLG"
pub const SEGMENT_MAGIC: [u8; 4] = *b"ZRLG";

/// Current segment format version
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 40;

/// Bytes of framing around each body (length + CRC)
pub const FRAME_OVERHEAD: usize = 8;

/// Redo segment header (40 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes: "ZRLG"
    pub magic: [u8; 4],

    /// Format version of the framing
    pub format_version: u32,

    /// Segment sequence number (monotonically increasing)
    pub sequence: u64,

    /// Creation time (millis since epoch)
    pub create_time: i64,

    /// Server that wrote the segment
    pub server_id: [u8; 16],
}

impl SegmentHeader {
    /// Create a new segment header.
    pub fn new(sequence: u64, create_time: i64, server_id: [u8; 16]) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            sequence,
            create_time,
            server_id,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.create_time.to_le_bytes());
        bytes[24..40].copy_from_slice(&self.server_id);
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Option<Self> {
        Some(SegmentHeader {
            magic: bytes[0..4].try_into().ok()?,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            sequence: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            create_time: i64::from_le_bytes(bytes[16..24].try_into().ok()?),
            server_id: bytes[24..40].try_into().ok()?,
        })
    }

    /// Validate the header has correct magic bytes and a known format.
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC && self.format_version == SEGMENT_FORMAT_VERSION
    }

    /// Read the header at the start of `file`.
    ///
    /// Returns `Ok(None)` if the file is shorter than a header.
    pub fn read_from(file: &mut File) -> std::io::Result<Option<Self>> {
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        let mut filled = 0;
        while filled < SEGMENT_HEADER_SIZE {
            let n = file.read(&mut bytes[filled..])?;
            if n == 0 {
                return Ok(None);
            }
            filled += n;
        }
        let header = SegmentHeader::from_bytes(&bytes).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid segment header")
        })?;
        if !header.is_valid() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid segment magic bytes",
            ));
        }
        Ok(Some(header))
    }
}

/// Writable redo segment file handle.
pub struct LogSegment {
    file: File,
    header: SegmentHeader,
    write_position: u64,
    path: PathBuf,
    closed: bool,
}

impl LogSegment {
    /// Create a new segment file at `path` and write its header.
    ///
    /// Fails if the file already exists.
    pub fn create(path: &Path, header: SegmentHeader) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(path)?;

        file.write_all(&header.to_bytes())?;

        Ok(LogSegment {
            file,
            header,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path: path.to_path_buf(),
            closed: false,
        })
    }

    /// Open an existing segment for appending.
    ///
    /// Returns `Ok(None)` if the file is too short to hold a header (a crash
    /// during creation); callers recreate the segment in that case.
    pub fn open_append(path: &Path) -> std::io::Result<Option<Self>> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let header = match SegmentHeader::read_from(&mut file)? {
            Some(h) => h,
            None => return Ok(None),
        };

        let write_position = file.seek(SeekFrom::End(0))?;

        Ok(Some(LogSegment {
            file,
            header,
            write_position,
            path: path.to_path_buf(),
            closed: false,
        }))
    }

    /// Segment header
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Sequence number
    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// True if no frame has been written
    pub fn is_empty(&self) -> bool {
        self.write_position <= SEGMENT_HEADER_SIZE as u64
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one frame: `primary` followed by `side_len` bytes read from
    /// `side`.
    ///
    /// The side channel is streamed into the file, never buffered whole.
    pub fn write_frame(
        &mut self,
        primary: &[u8],
        side: Option<(&mut dyn Read, u64)>,
    ) -> std::io::Result<u64> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Cannot write to closed segment",
            ));
        }

        let side_len = side.as_ref().map(|(_, len)| *len).unwrap_or(0);
        let body_len = primary.len() as u64 + side_len;
        let body_len = u32::try_from(body_len).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Frame body of {} bytes exceeds u32", body_len),
            )
        })?;

        let mut hasher = Hasher::new();
        self.file.write_all(&body_len.to_le_bytes())?;
        hasher.update(primary);
        self.file.write_all(primary)?;

        if let Some((reader, len)) = side {
            let mut remaining = len;
            let mut chunk = vec![0u8; 64 * 1024];
            while remaining > 0 {
                let want = remaining.min(chunk.len() as u64) as usize;
                let n = reader.read(&mut chunk[..want])?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("Side channel ended {} bytes early", remaining),
                    ));
                }
                hasher.update(&chunk[..n]);
                self.file.write_all(&chunk[..n])?;
                remaining -= n as u64;
            }
        }

        self.file.write_all(&hasher.finalize().to_le_bytes())?;
        let frame_len = body_len as u64 + FRAME_OVERHEAD as u64;
        self.write_position += frame_len;
        Ok(frame_len)
    }

    /// Sync segment data to disk.
    pub fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_data()
    }

    /// Sync and mark the segment closed.
    pub fn close(&mut self) -> std::io::Result<()> {
        if !self.closed {
            self.file.sync_all()?;
            self.closed = true;
        }
        Ok(())
    }

    /// Check if segment is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Truncate the segment at `position` (drops a torn tail).
    pub fn truncate(&mut self, position: u64) -> std::io::Result<()> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Cannot truncate closed segment",
            ));
        }
        self.file.set_len(position)?;
        self.file.sync_all()?;
        self.write_position = position;
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

/// Result of parsing one frame from an in-memory buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameParse<'a> {
    /// Complete frame with a valid checksum
    Complete {
        /// Frame body
        body: &'a [u8],
        /// Bytes consumed including framing
        consumed: usize,
    },
    /// Buffer ends inside the frame
    Incomplete,
    /// Complete frame whose checksum does not match
    ChecksumMismatch {
        /// CRC stored in the frame
        expected: u32,
        /// CRC computed over the body
        computed: u32,
    },
}

/// Build a complete frame around `body`.
pub fn frame_bytes(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(body);
    frame.extend_from_slice(&compute_crc(body).to_le_bytes());
    frame
}

/// Parse the frame at the start of `bytes`.
pub fn parse_frame(bytes: &[u8]) -> FrameParse<'_> {
    if bytes.len() < 4 {
        return FrameParse::Incomplete;
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[0..4]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    let total = len + FRAME_OVERHEAD;
    if bytes.len() < total {
        return FrameParse::Incomplete;
    }
    let body = &bytes[4..4 + len];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[4 + len..total]);
    let expected = u32::from_le_bytes(crc_bytes);
    let computed = compute_crc(body);
    if expected != computed {
        return FrameParse::ChecksumMismatch { expected, computed };
    }
    FrameParse::Complete {
        body,
        consumed: total,
    }
}

/// Compute CRC32 checksum of data.
pub fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

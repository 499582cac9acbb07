//! Primitive field codec for redo records.
//!
//! All multi-byte integers are big-endian. Strings are `len:i32 | utf8` with
//! `len = -1` for an absent string. Lists are `count:i32 | items`.
//!
//! [`RedoOutput`] and [`RedoInput`] both carry the [`Version`] of the stream
//! they write or read, so variant codecs gate optional fields with
//! `out.version().has(gates::X)` / `input.version().has(gates::X)` against the
//! same named constant.

use byteorder::{BigEndian, ByteOrder};
use zredo_core::{MailboxId, TransactionId, Version, VersionError};

/// Record codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Magic marker mismatch or structurally impossible field
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Stream version newer than this build understands
    #[error("Unsupported record version {found} (highest known {max_known})")]
    UnsupportedVersion {
        /// Version declared by the stream
        found: Version,
        /// Highest version the reader understands
        max_known: Version,
    },

    /// No variant registered for the opcode
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(i32),

    /// Input ended before the record did
    #[error("Truncated record: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// Offset at which the read was attempted
        offset: usize,
        /// Bytes the read required
        needed: usize,
        /// Bytes that were left
        available: usize,
    },

    /// Value cannot be represented at the target version
    #[error("Cannot encode at version {version}: {detail}")]
    Unencodable {
        /// Target version
        version: Version,
        /// What did not fit
        detail: String,
    },
}

impl CodecError {
    /// Shorthand for [`CodecError::CorruptRecord`]
    pub fn corrupt(detail: impl Into<String>) -> Self {
        CodecError::CorruptRecord(detail.into())
    }
}

impl From<VersionError> for CodecError {
    fn from(e: VersionError) -> Self {
        match e {
            VersionError::Unsupported { found, max_known } => {
                CodecError::UnsupportedVersion { found, max_known }
            }
        }
    }
}

/// Growable output buffer for one record at a fixed version.
#[derive(Debug)]
pub struct RedoOutput {
    buf: Vec<u8>,
    version: Version,
}

impl RedoOutput {
    /// Create an empty output that encodes at `version`.
    pub fn new(version: Version) -> Self {
        RedoOutput {
            buf: Vec::with_capacity(128),
            version,
        }
    }

    /// Version this output encodes at
    pub fn version(&self) -> Version {
        self.version
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the output, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append raw bytes.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a single byte
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a boolean as one byte
    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    /// Write a big-endian u16
    pub fn write_u16(&mut self, v: u16) {
        let mut b = [0u8; 2];
        BigEndian::write_u16(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    /// Write a big-endian i32
    pub fn write_i32(&mut self, v: i32) {
        let mut b = [0u8; 4];
        BigEndian::write_i32(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    /// Write a big-endian i64
    pub fn write_i64(&mut self, v: i64) {
        let mut b = [0u8; 8];
        BigEndian::write_i64(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    /// Write a big-endian u64
    pub fn write_u64(&mut self, v: u64) {
        let mut b = [0u8; 8];
        BigEndian::write_u64(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    /// Write a length-prefixed string
    pub fn write_str(&mut self, s: &str) -> Result<(), CodecError> {
        self.write_len(s.len())?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// Write an optional string (`-1` length when absent)
    pub fn write_opt_str(&mut self, s: Option<&str>) -> Result<(), CodecError> {
        match s {
            Some(s) => self.write_str(s),
            None => {
                self.write_i32(-1);
                Ok(())
            }
        }
    }

    /// Write a list of i32
    pub fn write_i32_list(&mut self, values: &[i32]) -> Result<(), CodecError> {
        self.write_len(values.len())?;
        for v in values {
            self.write_i32(*v);
        }
        Ok(())
    }

    /// Write a list of strings
    pub fn write_str_list(&mut self, values: &[String]) -> Result<(), CodecError> {
        self.write_len(values.len())?;
        for v in values {
            self.write_str(v)?;
        }
        Ok(())
    }

    /// Write a transaction id as `time:i32 | counter:i32`
    pub fn write_txn_id(&mut self, id: TransactionId) {
        self.write_i32(id.time);
        self.write_i32(id.counter);
    }

    /// Write a mailbox id at this output's width (i64 from 1.2, i32 before)
    pub fn write_mailbox_id(&mut self, id: MailboxId) -> Result<(), CodecError> {
        if self.version.has(zredo_core::gates::MAILBOX_ID_64) {
            self.write_i64(id.get());
        } else {
            let narrow = i32::try_from(id.get()).map_err(|_| CodecError::Unencodable {
                version: self.version,
                detail: format!("mailbox id {} does not fit in 32 bits", id),
            })?;
            self.write_i32(narrow);
        }
        Ok(())
    }

    fn write_len(&mut self, len: usize) -> Result<(), CodecError> {
        let len = i32::try_from(len).map_err(|_| CodecError::Unencodable {
            version: self.version,
            detail: format!("length {} exceeds i32", len),
        })?;
        self.write_i32(len);
        Ok(())
    }
}

/// Cursor over one record's bytes at a fixed version.
#[derive(Debug)]
pub struct RedoInput<'a> {
    data: &'a [u8],
    pos: usize,
    version: Version,
}

impl<'a> RedoInput<'a> {
    /// Read `data` as a stream written at `version`.
    pub fn new(data: &'a [u8], version: Version) -> Self {
        RedoInput {
            data,
            pos: 0,
            version,
        }
    }

    /// Version of the stream
    pub fn version(&self) -> Version {
        self.version
    }

    /// Change the version once the preamble has been read.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Borrow the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Read a boolean byte (any non-zero is true)
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian u16
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    /// Read a big-endian i32
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    /// Read a big-endian i64
    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(BigEndian::read_i64(self.take(8)?))
    }

    /// Read a big-endian u64
    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    /// Read a length-prefixed string (absent strings are an error)
    pub fn read_str(&mut self) -> Result<String, CodecError> {
        self.read_opt_str()?
            .ok_or_else(|| CodecError::corrupt(format!("null string at offset {}", self.pos)))
    }

    /// Read an optional string
    pub fn read_opt_str(&mut self) -> Result<Option<String>, CodecError> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(CodecError::corrupt(format!("negative string length {}", len)));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| CodecError::corrupt("string is not valid UTF-8"))
    }

    /// Read a list count
    pub fn read_count(&mut self) -> Result<usize, CodecError> {
        let count = self.read_i32()?;
        if count < 0 {
            return Err(CodecError::corrupt(format!("negative list count {}", count)));
        }
        Ok(count as usize)
    }

    /// Read a list of i32
    pub fn read_i32_list(&mut self) -> Result<Vec<i32>, CodecError> {
        let count = self.read_count()?;
        let mut values = Vec::with_capacity(count.min(self.remaining() / 4));
        for _ in 0..count {
            values.push(self.read_i32()?);
        }
        Ok(values)
    }

    /// Read a list of strings
    pub fn read_str_list(&mut self) -> Result<Vec<String>, CodecError> {
        let count = self.read_count()?;
        let mut values = Vec::with_capacity(count.min(self.remaining() / 4));
        for _ in 0..count {
            values.push(self.read_str()?);
        }
        Ok(values)
    }

    /// Read a transaction id
    pub fn read_txn_id(&mut self) -> Result<TransactionId, CodecError> {
        let time = self.read_i32()?;
        let counter = self.read_i32()?;
        Ok(TransactionId::new(time, counter))
    }

    /// Read a mailbox id at the stream's width
    pub fn read_mailbox_id(&mut self) -> Result<MailboxId, CodecError> {
        if self.version.has(zredo_core::gates::MAILBOX_ID_64) {
            Ok(MailboxId(self.read_i64()?))
        } else {
            Ok(MailboxId(i64::from(self.read_i32()?)))
        }
    }
}

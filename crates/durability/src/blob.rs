//! Blob side channel
//!
//! Large content (message bodies, incoming blobs) is not inlined into a
//! record's primary buffer. The primary buffer ends with a declaration:
//!
//! ```text
//! [compressed:u8 (from 1.3)] | len:i64
//! ```
//!
//! and exactly `len` bytes follow it in the frame. Those bytes are produced
//! on demand from the blob's backing [`BlobSource`], so a record that has to
//! be re-written during rollover streams its content again straight from
//! memory or from the file it came from. The stored bytes are written as-is:
//! if they were compressed when first logged they stay compressed.

use crate::format::{CodecError, RedoInput, RedoOutput};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use zredo_core::gates;

/// Default zstd level for compressed blobs
pub const COMPRESSION_LEVEL: i32 = 3;

/// Side-channel errors
#[derive(Debug, Error)]
pub enum BlobError {
    /// I/O failure reading or compressing content
    #[error("Blob I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content was declared but never attached
    #[error("Blob content not attached ({len} bytes declared)")]
    Missing {
        /// Declared length
        len: u64,
    },
}

/// Where a blob's stored bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobSource {
    /// Declared only; content not attached yet
    Pending,
    /// Shared in-memory buffer
    Memory(Arc<[u8]>),
    /// Whole file
    File(PathBuf),
    /// Byte range inside a file (e.g. within a log segment)
    FileRange {
        /// File holding the range
        path: PathBuf,
        /// Start offset
        offset: u64,
        /// Range length
        len: u64,
    },
}

/// Side-channel payload of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    source: BlobSource,
    len: u64,
    compressed: bool,
}

impl Default for Blob {
    fn default() -> Self {
        Blob {
            source: BlobSource::Pending,
            len: 0,
            compressed: false,
        }
    }
}

impl Blob {
    /// Blob over raw content, compressing it first when `compress` is set.
    pub fn from_bytes(content: &[u8], compress: bool) -> Result<Self, BlobError> {
        if compress {
            let packed = zstd::encode_all(content, COMPRESSION_LEVEL)?;
            Ok(Blob {
                len: packed.len() as u64,
                source: BlobSource::Memory(packed.into()),
                compressed: true,
            })
        } else {
            Ok(Blob {
                len: content.len() as u64,
                source: BlobSource::Memory(content.into()),
                compressed: false,
            })
        }
    }

    /// Blob backed by a whole file whose bytes are stored as-is.
    pub fn from_file(path: &Path, compressed: bool) -> Result<Self, BlobError> {
        let len = std::fs::metadata(path)?.len();
        Ok(Blob {
            source: BlobSource::File(path.to_path_buf()),
            len,
            compressed,
        })
    }

    /// Blob backed by a byte range of a file.
    pub fn from_range(path: &Path, offset: u64, len: u64, compressed: bool) -> Self {
        Blob {
            source: BlobSource::FileRange {
                path: path.to_path_buf(),
                offset,
                len,
            },
            len,
            compressed,
        }
    }

    /// Stored length (after compression, if any)
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if no content is stored
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if the stored bytes are zstd-compressed
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Backing source
    pub fn source(&self) -> &BlobSource {
        &self.source
    }

    /// True once content is attached
    pub fn is_attached(&self) -> bool {
        !matches!(self.source, BlobSource::Pending) || self.len == 0
    }

    /// Attach content after a declaration was decoded.
    pub(crate) fn attach(&mut self, source: BlobSource) {
        self.source = source;
    }

    /// Open a reader over the stored bytes, regenerated from the source.
    pub fn open(&self) -> Result<Box<dyn Read + Send>, BlobError> {
        match &self.source {
            BlobSource::Pending if self.len == 0 => Ok(Box::new(std::io::empty())),
            BlobSource::Pending => Err(BlobError::Missing { len: self.len }),
            BlobSource::Memory(data) => Ok(Box::new(Cursor::new(Arc::clone(data)))),
            BlobSource::File(path) => Ok(Box::new(File::open(path)?.take(self.len))),
            BlobSource::FileRange { path, offset, len } => {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(*offset))?;
                Ok(Box::new(file.take(*len)))
            }
        }
    }

    /// Read the stored bytes in full.
    pub fn load_stored(&self) -> Result<Vec<u8>, BlobError> {
        let mut buf = Vec::with_capacity(self.len as usize);
        self.open()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read the content, decompressing if needed.
    pub fn load_raw(&self) -> Result<Vec<u8>, BlobError> {
        let stored = self.load_stored()?;
        if self.compressed {
            Ok(zstd::decode_all(stored.as_slice())?)
        } else {
            Ok(stored)
        }
    }

    /// Write the declaration that ends the primary buffer.
    pub fn encode_declaration(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        if out.version().has(gates::BLOB_COMPRESSED_FLAG) {
            out.write_bool(self.compressed);
        } else if self.compressed {
            return Err(CodecError::Unencodable {
                version: out.version(),
                detail: "compressed blob".to_string(),
            });
        }
        let len = i64::try_from(self.len).map_err(|_| CodecError::Unencodable {
            version: out.version(),
            detail: format!("blob length {}", self.len),
        })?;
        out.write_i64(len);
        Ok(())
    }

    /// Read a declaration; the content stays [`BlobSource::Pending`].
    pub fn decode_declaration(input: &mut RedoInput<'_>) -> Result<Self, CodecError> {
        let compressed = if input.version().has(gates::BLOB_COMPRESSED_FLAG) {
            input.read_bool()?
        } else {
            false
        };
        let len = input.read_i64()?;
        if len < 0 {
            return Err(CodecError::corrupt(format!("negative blob length {}", len)));
        }
        Ok(Blob {
            source: BlobSource::Pending,
            len: len as u64,
            compressed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use zredo_core::Version;

    #[test]
    fn test_memory_blob() {
        let blob = Blob::from_bytes(b"hello world", false).unwrap();
        assert_eq!(blob.len(), 11);
        assert!(!blob.is_compressed());
        assert_eq!(blob.load_raw().unwrap(), b"hello world");
        // Two independent readers over the same buffer
        assert_eq!(blob.load_stored().unwrap(), blob.load_stored().unwrap());
    }

    #[test]
    fn test_compressed_blob_keeps_stored_bytes() {
        let content = vec![b'a'; 10_000];
        let blob = Blob::from_bytes(&content, true).unwrap();
        assert!(blob.is_compressed());
        assert!(blob.len() < content.len() as u64);
        assert_eq!(blob.load_stored().unwrap().len() as u64, blob.len());
        assert_eq!(blob.load_raw().unwrap(), content);
    }

    #[test]
    fn test_file_range_blob() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        std::fs::write(&path, b"xxxxPAYLOADyyyy").unwrap();
        let blob = Blob::from_range(&path, 4, 7, false);
        assert_eq!(blob.load_raw().unwrap(), b"PAYLOAD");

        let whole = Blob::from_file(&path, false).unwrap();
        assert_eq!(whole.len(), 15);
    }

    #[test]
    fn test_declaration_gated_on_version() {
        let blob = Blob::from_bytes(b"abc", false).unwrap();

        let mut out = RedoOutput::new(Version::CURRENT);
        blob.encode_declaration(&mut out).unwrap();
        assert_eq!(out.len(), 9);
        let bytes = out.into_bytes();
        let decl = Blob::decode_declaration(&mut RedoInput::new(&bytes, Version::CURRENT)).unwrap();
        assert_eq!(decl.len(), 3);
        assert!(!decl.is_compressed());
        assert_eq!(decl.source(), &BlobSource::Pending);

        let old = Version::new(1, 2);
        let mut out = RedoOutput::new(old);
        blob.encode_declaration(&mut out).unwrap();
        assert_eq!(out.len(), 8);
        let bytes = out.into_bytes();
        let decl = Blob::decode_declaration(&mut RedoInput::new(&bytes, old)).unwrap();
        assert_eq!(decl.len(), 3);
    }

    #[test]
    fn test_compressed_blob_unencodable_before_flag() {
        let blob = Blob::from_bytes(b"abc", true).unwrap();
        let mut out = RedoOutput::new(Version::new(1, 2));
        assert!(matches!(
            blob.encode_declaration(&mut out),
            Err(CodecError::Unencodable { .. })
        ));
    }

    #[test]
    fn test_pending_blob_cannot_open() {
        let mut blob = Blob::from_bytes(b"abc", false).unwrap();
        blob.attach(BlobSource::Pending);
        assert!(matches!(blob.open(), Err(BlobError::Missing { len: 3 })));
        assert!(!blob.is_attached());
    }
}

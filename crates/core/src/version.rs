//! Log format version and version gates
//!
//! Every serialized record declares the `(major, minor)` version it was
//! written at. Fields added after the initial release are guarded on both the
//! encode and the decode side by an "at least" check against one of the
//! named [`gates`]. Because both sides reference the same constant, a writer
//! and a reader can never disagree on where a field starts.
//!
//! ## Version History
//!
//! | Version | Change |
//! |---------|--------|
//! | 1.0 | Initial layout, mailbox id is an i32 |
//! | 1.1 | Calendar replies list |
//! | 1.2 | Mailbox id widened to i64 |
//! | 1.3 | Blob `compressed` flag; replies count encoding fixed |
//! | 1.4 | Index `delete_first` flag |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered `(major, minor)` log format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
}

impl Version {
    /// Highest version this build reads and the one it writes by default.
    pub const CURRENT: Version = Version::new(1, 4);

    /// First released version.
    pub const INITIAL: Version = Version::new(1, 0);

    /// Create a version
    pub const fn new(major: u16, minor: u16) -> Self {
        Version { major, minor }
    }

    /// True if `self >= (major, minor)`.
    ///
    /// This is the single predicate the codec uses to decide whether an
    /// optional field is present in a stream.
    pub const fn at_least(&self, major: u16, minor: u16) -> bool {
        self.major > major || (self.major == major && self.minor >= minor)
    }

    /// True if `self >= gate`.
    pub const fn has(&self, gate: Version) -> bool {
        self.at_least(gate.major, gate.minor)
    }

    /// True if `self` is within `[from, until)`.
    pub const fn within(&self, from: Version, until: Version) -> bool {
        self.has(from) && !self.has(until)
    }

    /// Fail if this version is newer than `max_known`.
    pub fn check_supported(&self, max_known: Version) -> Result<(), VersionError> {
        if *self > max_known {
            return Err(VersionError::Unsupported {
                found: *self,
                max_known,
            });
        }
        Ok(())
    }

    /// Serialize as `major:u16 | minor:u16` big-endian.
    pub fn to_bytes(&self) -> [u8; 4] {
        let mut bytes = [0u8; 4];
        bytes[0..2].copy_from_slice(&self.major.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.minor.to_be_bytes());
        bytes
    }

    /// Deserialize from `major:u16 | minor:u16` big-endian.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Version {
            major: u16::from_be_bytes([bytes[0], bytes[1]]),
            minor: u16::from_be_bytes([bytes[2], bytes[3]]),
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::CURRENT
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Named thresholds at which optional fields appear.
pub mod gates {
    use super::Version;

    /// `SetCalendarItem` carries a replies list
    pub const CALENDAR_REPLIES: Version = Version::new(1, 1);

    /// Mailbox id is encoded as i64 instead of i32
    pub const MAILBOX_ID_64: Version = Version::new(1, 2);

    /// Blob-carrying records encode a `compressed` flag
    pub const BLOB_COMPRESSED_FLAG: Version = Version::new(1, 3);

    /// Replies counts written before this version may be garbage
    pub const REPLIES_COUNT_FIXED: Version = Version::new(1, 3);

    /// `IndexItem` carries `delete_first`
    pub const INDEX_DELETE_FIRST: Version = Version::new(1, 4);
}

/// Version errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Stream declares a version newer than this build understands
    #[error("Unsupported log version {found} (highest known {max_known})")]
    Unsupported {
        /// Version found in the stream
        found: Version,
        /// Highest version the reader understands
        max_known: Version,
    },
}

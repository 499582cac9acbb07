//! Segment archive naming and rollover repair
//!
//! A rollover stages the next segment as `redo.log.tmp`, archives the old
//! `redo.log` as `redo-NNNNNN.log`, then renames the staged file into place.
//! A crash between those steps leaves one of two shapes, both repaired at
//! startup:
//!
//! | On disk | Meaning | Repair |
//! |---------|---------|--------|
//! | `redo.log.tmp` only | old segment archived, new one not promoted | promote tmp |
//! | `redo.log` + `redo.log.tmp` | crash before archiving | discard tmp |

use std::path::{Path, PathBuf};

const ARCHIVE_PREFIX: &str = "redo-";
const ARCHIVE_SUFFIX: &str = ".log";

/// Outcome of [`RolloverManager::repair`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    /// Nothing to repair
    None,
    /// Staged segment promoted to the active log
    PromotedTemp,
    /// Staged segment discarded
    DiscardedTemp,
}

/// Archive naming and listing for one log.
#[derive(Debug, Clone)]
pub struct RolloverManager {
    log_path: PathBuf,
    archive_dir: PathBuf,
}

impl RolloverManager {
    /// Manager for the active log at `log_path`
    pub fn new(log_path: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        RolloverManager {
            log_path: log_path.into(),
            archive_dir: archive_dir.into(),
        }
    }

    /// Archive file name for segment `sequence`.
    ///
    /// Format: `redo-NNNNNN.log` where NNNNNN is the zero-padded sequence.
    pub fn archive_file_name(sequence: u64) -> String {
        format!("{}{:06}{}", ARCHIVE_PREFIX, sequence, ARCHIVE_SUFFIX)
    }

    /// Parse the sequence out of an archive file name.
    pub fn parse_archive_sequence(name: &str) -> Option<u64> {
        let digits = name
            .strip_prefix(ARCHIVE_PREFIX)?
            .strip_suffix(ARCHIVE_SUFFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Active log path
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Archive directory
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Path the next segment is staged at
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self
            .log_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.log_path.with_file_name(name)
    }

    /// Archive path for segment `sequence`
    pub fn archive_path(&self, sequence: u64) -> PathBuf {
        self.archive_dir.join(Self::archive_file_name(sequence))
    }

    /// Repair an interrupted rollover.
    pub fn repair(&self) -> std::io::Result<RepairAction> {
        let tmp = self.temp_path();
        if !tmp.exists() {
            return Ok(RepairAction::None);
        }
        if self.log_path.exists() {
            std::fs::remove_file(&tmp)?;
            tracing::warn!(path = ?tmp, "Discarded staged segment from interrupted rollover");
            Ok(RepairAction::DiscardedTemp)
        } else {
            std::fs::rename(&tmp, &self.log_path)?;
            tracing::warn!(path = ?self.log_path, "Promoted staged segment from interrupted rollover");
            Ok(RepairAction::PromotedTemp)
        }
    }

    /// Archived segments with sequence >= `from_sequence`, in sequence order.
    pub fn archived_logs(&self, from_sequence: u64) -> std::io::Result<Vec<(u64, PathBuf)>> {
        let entries = match std::fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut logs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(seq) = Self::parse_archive_sequence(&name) {
                if seq >= from_sequence {
                    logs.push((seq, entry.path()));
                }
            }
        }
        logs.sort();
        Ok(logs)
    }

    /// Highest archived sequence, if any
    pub fn latest_archived_sequence(&self) -> std::io::Result<Option<u64>> {
        Ok(self.archived_logs(0)?.last().map(|(seq, _)| *seq))
    }
}

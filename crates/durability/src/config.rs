//! Redo log configuration.

use crate::recovery::ReplayPolicy;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File name of the active segment
pub const ACTIVE_LOG_NAME: &str = "redo.log";

/// Redo log configuration parameters.
#[derive(Debug, Clone)]
pub struct RedoConfig {
    /// Directory holding the active segment (default: `redolog`).
    pub log_dir: PathBuf,

    /// Directory archived segments are moved to (default: `redolog/archive`).
    pub archive_dir: PathBuf,

    /// Milliseconds between background fsyncs (default: 10).
    ///
    /// Zero disables the background flusher: every append is synced before
    /// it returns.
    pub fsync_interval_ms: u64,

    /// Minimum age of a segment before a soft-limit rollover (default: 30 min).
    pub rollover_min_age_ms: u64,

    /// Size at which an old enough segment rolls over (default: 1GB).
    pub rollover_soft_max_bytes: u64,

    /// Size at which a segment always rolls over (default: 4GB).
    pub rollover_hard_max_bytes: u64,

    /// Replay the active segment on startup (default: true).
    pub crash_recovery: bool,

    /// Whether records are written at all (default: true).
    pub enabled: bool,

    /// How replay reacts to store failures.
    pub replay_policy: ReplayPolicy,

    /// Server identity stamped into segment headers.
    pub server_id: Uuid,
}

impl Default for RedoConfig {
    fn default() -> Self {
        RedoConfig {
            log_dir: PathBuf::from("redolog"),
            archive_dir: PathBuf::from("redolog/archive"),
            fsync_interval_ms: 10,
            rollover_min_age_ms: 30 * 60 * 1000,
            rollover_soft_max_bytes: 1024 * 1024 * 1024, // 1GB
            rollover_hard_max_bytes: 4 * 1024 * 1024 * 1024, // 4GB
            crash_recovery: true,
            enabled: true,
            replay_policy: ReplayPolicy::default(),
            server_id: Uuid::new_v4(),
        }
    }
}

impl RedoConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put the active log in `dir` and archives in `dir/archive`.
    pub fn with_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self.archive_dir = dir.as_ref().join("archive");
        self
    }

    /// Set the archive directory (builder pattern).
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = dir.into();
        self
    }

    /// Set the fsync interval (builder pattern).
    pub fn with_fsync_interval_ms(mut self, ms: u64) -> Self {
        self.fsync_interval_ms = ms;
        self
    }

    /// Set the rollover limits (builder pattern).
    pub fn with_rollover_limits(mut self, soft_max: u64, hard_max: u64, min_age_ms: u64) -> Self {
        self.rollover_soft_max_bytes = soft_max;
        self.rollover_hard_max_bytes = hard_max;
        self.rollover_min_age_ms = min_age_ms;
        self
    }

    /// Enable or disable startup crash recovery (builder pattern).
    pub fn with_crash_recovery(mut self, enabled: bool) -> Self {
        self.crash_recovery = enabled;
        self
    }

    /// Enable or disable logging (builder pattern).
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the replay policy (builder pattern).
    pub fn with_replay_policy(mut self, policy: ReplayPolicy) -> Self {
        self.replay_policy = policy;
        self
    }

    /// Set the server id (builder pattern).
    pub fn with_server_id(mut self, id: Uuid) -> Self {
        self.server_id = id;
        self
    }

    /// Path of the active segment
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(ACTIVE_LOG_NAME)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollover_soft_max_bytes == 0 {
            return Err(ConfigError::ZeroSoftMax);
        }
        if self.rollover_hard_max_bytes < self.rollover_soft_max_bytes {
            return Err(ConfigError::HardMaxBelowSoftMax {
                soft: self.rollover_soft_max_bytes,
                hard: self.rollover_hard_max_bytes,
            });
        }
        if self.log_dir == self.archive_dir {
            return Err(ConfigError::ArchiveIsLogDir(self.log_dir.clone()));
        }
        Ok(())
    }

    /// Configuration for tests: synchronous appends, small limits, no age.
    pub fn for_testing(dir: impl AsRef<Path>) -> Self {
        RedoConfig::default()
            .with_dir(dir)
            .with_fsync_interval_ms(0)
            .with_rollover_limits(64 * 1024, 256 * 1024, 0)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Soft rollover limit is zero.
    #[error("Rollover soft max must be greater than zero")]
    ZeroSoftMax,

    /// Hard rollover limit below the soft limit.
    #[error("Rollover hard max {hard} is below soft max {soft}")]
    HardMaxBelowSoftMax {
        /// Soft limit
        soft: u64,
        /// Hard limit
        hard: u64,
    },

    /// Archive directory is the log directory.
    #[error("Archive directory must differ from log directory {0:?}")]
    ArchiveIsLogDir(PathBuf),
}

//! Recovery and replay
//!
//! [`RedoPlayer`] reads segments in order, tracks which transactions are
//! open, and applies a transaction's start record to the mailbox store when
//! its commit record is reached.
//!
//! | Record | Effect |
//! |--------|--------|
//! | start marker | enters the open map |
//! | `CommitTxn` | start record replayed (or deferred), leaves the map |
//! | `AbortTxn` | start record dropped |
//! | `Checkpoint` | open map checked against the listed ids (warn only) |
//! | `Rollover` | counted |
//!
//! A torn frame at the end of a segment ends that segment cleanly. Anything
//! else the reader cannot decode is fatal and surfaces as a distinct
//! [`RecoveryError`] variant.

pub mod player;

pub use player::{
    redo_record, run_crash_recovery, RecoveryError, RecoveryReport, RedoOutcome, RedoPlayer,
    ReplayStats,
};

use serde::{Deserialize, Serialize};

/// What replay does when the store rejects a record with a
/// non-idempotent error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop and return the error
    #[default]
    Halt,
    /// Log the failure, count it, and continue with the next record
    SkipRecord,
}

/// Replay policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayPolicy {
    /// Reaction to a failed redo
    pub on_failure: FailurePolicy,
}

impl ReplayPolicy {
    /// Stop at the first failed redo
    pub fn halt() -> Self {
        ReplayPolicy {
            on_failure: FailurePolicy::Halt,
        }
    }

    /// Skip failed records and continue
    pub fn skip_failures() -> Self {
        ReplayPolicy {
            on_failure: FailurePolicy::SkipRecord,
        }
    }
}

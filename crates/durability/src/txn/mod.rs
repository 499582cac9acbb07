//! Transaction lifecycle
//!
//! - `id`: transaction id allocation
//! - `chain`: commit permission for chained child records
//! - `record`: [`LogRecord`], its lifecycle and codec entry points

pub mod chain;
pub mod id;
pub mod record;

pub use chain::CommitGate;
pub use id::TxnIdGenerator;
pub use record::{
    BlobOrigin, CommitCallback, CommitHook, CommitInfo, DecodeOptions, LogRecord, RedoError,
    TxnState,
};

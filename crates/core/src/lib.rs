//! Core types and traits for the mailbox redo log
//!
//! This crate defines the vocabulary shared by every layer of the log:
//! - MailboxId, ItemId, ItemType: identifiers for the things operations touch
//! - TransactionId: per-log transaction identity (time + counter)
//! - Version: log format version and the named gates used by the codec
//! - MailboxStore: the collaborator that redo operations apply themselves to
//! - StoreError: the business-outcome taxonomy the replay engine interprets

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod store;
pub mod types;
pub mod version;

pub use error::{StoreError, StoreResult};
pub use store::{
    CalendarReply, MailboxStore, NewCalendarItem, NewFolder, NewMessage, OperationContext,
};
pub use types::{now_millis, ItemId, ItemType, MailboxId, TransactionId};
pub use version::{gates, Version, VersionError};

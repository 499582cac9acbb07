//! Business errors raised by the mailbox store
//!
//! Redo operations apply themselves to a [`crate::MailboxStore`]. The store
//! reports failures through [`StoreError`], and the replay engine gives two of
//! its variants special meaning: `AlreadyExists` and `NoSuchItem` are the
//! expected outcomes of replaying an operation whose effect is already in
//! place, so replay treats them as success.

use crate::types::{ItemId, MailboxId};
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by a mailbox store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Target already exists (a prior replay already created it)
    #[error("Already exists in mailbox {mailbox}: {what}")]
    AlreadyExists {
        /// Mailbox the operation targeted
        mailbox: MailboxId,
        /// Description of the existing target
        what: String,
    },

    /// Target item does not exist (deleted by a later operation)
    #[error("No such item {item} in mailbox {mailbox}")]
    NoSuchItem {
        /// Mailbox the operation targeted
        mailbox: MailboxId,
        /// Missing item id
        item: ItemId,
    },

    /// Mailbox does not exist
    #[error("No such mailbox: {0}")]
    NoSuchMailbox(MailboxId),

    /// Item changed since the caller last saw it
    #[error("Item {item} modified: change constraint {constraint}, current change {current}")]
    Modified {
        /// Item id
        item: ItemId,
        /// Change id the operation asserted
        constraint: i32,
        /// Change id found in the store
        current: i32,
    },

    /// Any other business failure
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    /// True for outcomes that replay treats as "already applied".
    pub fn is_idempotent_outcome(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyExists { .. } | StoreError::NoSuchItem { .. }
        )
    }

    /// Convenience constructor for [`StoreError::AlreadyExists`]
    pub fn already_exists(mailbox: MailboxId, what: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            mailbox,
            what: what.into(),
        }
    }
}

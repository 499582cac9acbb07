//! Mailbox store collaborator
//!
//! The redo log never implements mailbox semantics itself. Each operation
//! variant's `redo()` calls exactly one method of [`MailboxStore`], passing
//! an [`OperationContext`] built from the record header.

use crate::error::StoreResult;
use crate::types::{ItemId, ItemType, MailboxId, TransactionId};
use serde::{Deserialize, Serialize};

/// Header context handed to every store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationContext {
    /// Mailbox the record applies to
    pub mailbox: MailboxId,
    /// Transaction that produced the record
    pub txn_id: TransactionId,
    /// Wall-clock time of the original operation (millis)
    pub timestamp: i64,
    /// Change id assigned by the original operation (-1 if none)
    pub change_id: i32,
    /// Last-known change id of the target (-1 for no constraint)
    pub change_constraint: i32,
    /// Set when the store is being driven by log replay
    pub replay: bool,
}

impl OperationContext {
    /// Context with no change tracking
    pub fn new(mailbox: MailboxId, txn_id: TransactionId, timestamp: i64) -> Self {
        OperationContext {
            mailbox,
            txn_id,
            timestamp,
            change_id: -1,
            change_constraint: -1,
            replay: false,
        }
    }

    /// True when the caller asserted the target's last-known change id
    pub fn has_constraint(&self) -> bool {
        self.change_constraint >= 0
    }
}

/// Folder creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFolder {
    /// Id the folder was assigned when first created
    pub id: ItemId,
    /// Parent folder
    pub parent_id: ItemId,
    /// Folder name
    pub name: String,
    /// Default view (e.g. "message", "appointment")
    pub view: Option<String>,
}

/// Message creation parameters (content travels separately)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Id the message was assigned when first created
    pub id: ItemId,
    /// Folder the message lands in
    pub folder_id: ItemId,
    /// Flag bitmask
    pub flags: i32,
    /// Tag names
    pub tags: Vec<String>,
    /// Content digest
    pub digest: String,
}

/// One attendee reply recorded on a calendar item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarReply {
    /// Attendee address
    pub attendee: String,
    /// Participation status (e.g. "AC", "DE", "TE")
    pub status: String,
    /// Sequence number of the invite replied to
    pub sequence: i32,
    /// Reply time (millis)
    pub timestamp: i64,
}

/// Calendar item state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCalendarItem {
    /// Item id
    pub id: ItemId,
    /// Calendar folder
    pub folder_id: ItemId,
    /// iCalendar UID
    pub uid: String,
    /// Attendee replies
    pub replies: Vec<CalendarReply>,
}

/// Mailbox store interface consumed by redo operations.
///
/// Implementations report business outcomes through
/// [`crate::StoreError`]. During replay, `AlreadyExists` and `NoSuchItem`
/// are interpreted as "already applied".
pub trait MailboxStore: Send + Sync {
    /// Create a mailbox for an account
    fn create_mailbox(&self, ctx: &OperationContext, account_id: &str) -> StoreResult<()>;

    /// Create a folder
    fn create_folder(&self, ctx: &OperationContext, folder: &NewFolder) -> StoreResult<()>;

    /// Create a message with its raw content
    fn create_message(
        &self,
        ctx: &OperationContext,
        message: &NewMessage,
        content: &[u8],
    ) -> StoreResult<()>;

    /// Delete items
    fn delete_items(
        &self,
        ctx: &OperationContext,
        ids: &[ItemId],
        item_type: ItemType,
    ) -> StoreResult<()>;

    /// Move items into another folder
    fn move_items(
        &self,
        ctx: &OperationContext,
        ids: &[ItemId],
        item_type: ItemType,
        target_folder: ItemId,
    ) -> StoreResult<()>;

    /// Replace the tag set of items
    fn set_tags(
        &self,
        ctx: &OperationContext,
        ids: &[ItemId],
        item_type: ItemType,
        tags: &[String],
    ) -> StoreResult<()>;

    /// Index (or re-index) one item
    fn index_item(
        &self,
        ctx: &OperationContext,
        id: ItemId,
        item_type: ItemType,
        delete_first: bool,
    ) -> StoreResult<()>;

    /// Store a blob shared by several recipient mailboxes
    fn store_incoming_blob(
        &self,
        ctx: &OperationContext,
        digest: &str,
        recipients: &[MailboxId],
        content: &[u8],
    ) -> StoreResult<()>;

    /// Rebuild the search index of a whole mailbox
    fn reindex_mailbox(&self, ctx: &OperationContext, types: &[ItemType]) -> StoreResult<()>;

    /// Create or replace a calendar item
    fn set_calendar_item(&self, ctx: &OperationContext, item: &NewCalendarItem)
        -> StoreResult<()>;
}

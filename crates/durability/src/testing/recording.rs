use crate::log::{LogError, RedoLog};
use crate::op::Opcode;
use crate::txn::{CommitCallback, CommitInfo, LogRecord, TxnIdGenerator};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use zredo_core::{
    ItemId, ItemType, MailboxId, MailboxStore, NewCalendarItem, NewFolder, NewMessage,
    OperationContext, StoreError, StoreResult, TransactionId,
};

/// What a [`RecordingLog`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Record appended
    Append {
        /// Record transaction
        txn_id: TransactionId,
        /// Record opcode
        opcode: Opcode,
        /// Synchronous append
        sync: bool,
    },
    /// Commit notification
    Commit {
        /// Committed transaction
        txn_id: TransactionId,
    },
    /// Abort notification
    Abort {
        /// Aborted transaction
        txn_id: TransactionId,
    },
}

/// In-memory [`RedoLog`] that keeps the order of notifications.
#[derive(Debug, Default)]
pub struct RecordingLog {
    ids: TxnIdGenerator,
    events: Mutex<Vec<LogEvent>>,
}

impl RecordingLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in order
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Committed transactions in notification order
    pub fn commits(&self) -> Vec<TransactionId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                LogEvent::Commit { txn_id } => Some(*txn_id),
                _ => None,
            })
            .collect()
    }

    /// Aborted transactions in notification order
    pub fn aborts(&self) -> Vec<TransactionId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                LogEvent::Abort { txn_id } => Some(*txn_id),
                _ => None,
            })
            .collect()
    }
}

impl RedoLog for RecordingLog {
    fn next_txn_id(&self) -> TransactionId {
        self.ids.next()
    }

    fn log(&self, record: &Arc<LogRecord>, sync: bool) -> Result<(), LogError> {
        record.serialized_bytes()?;
        self.events.lock().push(LogEvent::Append {
            txn_id: record.txn_id(),
            opcode: record.opcode(),
            sync,
        });
        Ok(())
    }

    fn commit(
        &self,
        record: &Arc<LogRecord>,
        callbacks: &mut Vec<CommitCallback>,
    ) -> Result<(), LogError> {
        self.events.lock().push(LogEvent::Commit {
            txn_id: record.txn_id(),
        });
        let info = CommitInfo {
            txn_id: record.txn_id(),
            opcode: record.opcode(),
            mailbox_id: record.mailbox_id(),
            timestamp: zredo_core::now_millis(),
        };
        for cb in callbacks.drain(..) {
            cb(&info);
        }
        Ok(())
    }

    fn abort(&self, record: &Arc<LogRecord>) -> Result<(), LogError> {
        self.events.lock().push(LogEvent::Abort {
            txn_id: record.txn_id(),
        });
        Ok(())
    }
}

/// Store double tracking folders by `(mailbox, id)`.
///
/// - creating an existing folder reports `AlreadyExists`
/// - deleting a missing item reports `NoSuchItem`
/// - a folder named `"fail..."` reports `Other`
#[derive(Debug, Default)]
pub struct RecordingStore {
    folders: Mutex<BTreeMap<(MailboxId, ItemId), String>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Folder names keyed by `(mailbox, id)`
    pub fn folders(&self) -> BTreeMap<(MailboxId, ItemId), String> {
        self.folders.lock().clone()
    }

    /// Names of applied folders in call order, including rejected calls
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl MailboxStore for RecordingStore {
    fn create_mailbox(&self, _ctx: &OperationContext, _account_id: &str) -> StoreResult<()> {
        Ok(())
    }

    fn create_folder(&self, ctx: &OperationContext, folder: &NewFolder) -> StoreResult<()> {
        self.calls.lock().push(folder.name.clone());
        if folder.name.starts_with("fail") {
            return Err(StoreError::Other(format!("refused {}", folder.name)));
        }
        let mut folders = self.folders.lock();
        let key = (ctx.mailbox, folder.id);
        if folders.contains_key(&key) {
            return Err(StoreError::already_exists(
                ctx.mailbox,
                format!("folder {}", folder.id),
            ));
        }
        folders.insert(key, folder.name.clone());
        Ok(())
    }

    fn create_message(
        &self,
        _ctx: &OperationContext,
        _message: &NewMessage,
        _content: &[u8],
    ) -> StoreResult<()> {
        Ok(())
    }

    fn delete_items(
        &self,
        ctx: &OperationContext,
        ids: &[ItemId],
        _item_type: ItemType,
    ) -> StoreResult<()> {
        let mut folders = self.folders.lock();
        for id in ids {
            if folders.remove(&(ctx.mailbox, *id)).is_none() {
                return Err(StoreError::NoSuchItem {
                    mailbox: ctx.mailbox,
                    item: *id,
                });
            }
        }
        Ok(())
    }

    fn move_items(
        &self,
        _ctx: &OperationContext,
        _ids: &[ItemId],
        _item_type: ItemType,
        _target_folder: ItemId,
    ) -> StoreResult<()> {
        Ok(())
    }

    fn set_tags(
        &self,
        _ctx: &OperationContext,
        _ids: &[ItemId],
        _item_type: ItemType,
        _tags: &[String],
    ) -> StoreResult<()> {
        Ok(())
    }

    fn index_item(
        &self,
        _ctx: &OperationContext,
        _id: ItemId,
        _item_type: ItemType,
        _delete_first: bool,
    ) -> StoreResult<()> {
        Ok(())
    }

    fn store_incoming_blob(
        &self,
        _ctx: &OperationContext,
        _digest: &str,
        _recipients: &[MailboxId],
        _content: &[u8],
    ) -> StoreResult<()> {
        Ok(())
    }

    fn reindex_mailbox(&self, _ctx: &OperationContext, _types: &[ItemType]) -> StoreResult<()> {
        Ok(())
    }

    fn set_calendar_item(
        &self,
        _ctx: &OperationContext,
        _item: &NewCalendarItem,
    ) -> StoreResult<()> {
        Ok(())
    }
}

//! In-memory reference mailbox store
//!
//! [`ReferenceStore`] implements [`MailboxStore`] with the outcomes a real
//! store reports, so replay tests can check idempotence:
//!
//! - creating something that exists reports `AlreadyExists`
//! - touching a missing item reports `NoSuchItem`
//! - a change constraint older than the item's last change reports `Modified`
//!
//! A strict store rejects operations on mailboxes it has not seen created.
//! A lenient store (used for dry-run replay of a log fragment) creates them
//! on first use.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use zredo_core::{
    ItemId, ItemType, MailboxId, MailboxStore, NewCalendarItem, NewFolder, NewMessage,
    OperationContext, StoreError, StoreResult,
};

/// One stored item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredItem {
    /// Item type
    pub item_type: ItemType,
    /// Containing folder
    pub folder_id: ItemId,
    /// Folder name or calendar uid
    pub name: String,
    /// Flag bitmask
    pub flags: i32,
    /// Tags
    pub tags: Vec<String>,
    /// Message content size
    pub size: usize,
    /// Last change id applied to the item
    pub change_id: i32,
    /// Calendar replies, for appointments
    pub replies: usize,
}

/// State of one mailbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MailboxState {
    /// Owning account
    pub account_id: String,
    /// Items by id
    pub items: BTreeMap<ItemId, StoredItem>,
    /// Ids present in the search index
    pub indexed: BTreeSet<ItemId>,
    /// Number of full reindex runs
    pub reindexes: u32,
}

/// Shared incoming blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedBlob {
    /// Recipient mailboxes
    pub recipients: Vec<MailboxId>,
    /// Content size
    pub size: usize,
}

/// Comparable copy of a store's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSnapshot {
    /// Mailboxes by id
    pub mailboxes: BTreeMap<MailboxId, MailboxState>,
    /// Shared blobs by digest
    pub blobs: FxHashMap<String, SharedBlob>,
}

impl StoreSnapshot {
    /// Total items across mailboxes
    pub fn item_count(&self) -> usize {
        self.mailboxes.values().map(|m| m.items.len()).sum()
    }
}

/// In-memory [`MailboxStore`].
#[derive(Debug, Default)]
pub struct ReferenceStore {
    state: RwLock<StoreSnapshot>,
    lenient: bool,
}

impl ReferenceStore {
    /// Store that requires mailboxes to be created first
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that creates mailboxes on first use
    pub fn lenient() -> Self {
        ReferenceStore {
            state: RwLock::new(StoreSnapshot::default()),
            lenient: true,
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.read().clone()
    }

    /// True if the mailbox exists
    pub fn has_mailbox(&self, mailbox: MailboxId) -> bool {
        self.state.read().mailboxes.contains_key(&mailbox)
    }

    /// One item, if present
    pub fn item(&self, mailbox: MailboxId, id: ItemId) -> Option<StoredItem> {
        self.state
            .read()
            .mailboxes
            .get(&mailbox)
            .and_then(|m| m.items.get(&id).cloned())
    }

    /// Indexed ids of a mailbox
    pub fn indexed(&self, mailbox: MailboxId) -> Vec<ItemId> {
        self.state
            .read()
            .mailboxes
            .get(&mailbox)
            .map(|m| m.indexed.iter().copied().collect())
            .unwrap_or_default()
    }

    fn with_mailbox<T>(
        &self,
        mailbox: MailboxId,
        f: impl FnOnce(&mut MailboxState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self.state.write();
        if self.lenient {
            return f(state.mailboxes.entry(mailbox).or_default());
        }
        match state.mailboxes.get_mut(&mailbox) {
            Some(m) => f(m),
            None => Err(StoreError::NoSuchMailbox(mailbox)),
        }
    }
}

fn check_constraint(ctx: &OperationContext, id: ItemId, item: &StoredItem) -> StoreResult<()> {
    if ctx.has_constraint() && item.change_id > ctx.change_constraint {
        return Err(StoreError::Modified {
            item: id,
            constraint: ctx.change_constraint,
            current: item.change_id,
        });
    }
    Ok(())
}

fn missing(ctx: &OperationContext, mailbox: &MailboxState, ids: &[ItemId]) -> Option<StoreError> {
    ids.iter()
        .find(|id| !mailbox.items.contains_key(id))
        .map(|id| StoreError::NoSuchItem {
            mailbox: ctx.mailbox,
            item: *id,
        })
}

impl MailboxStore for ReferenceStore {
    fn create_mailbox(&self, ctx: &OperationContext, account_id: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        if let Some(existing) = state.mailboxes.get_mut(&ctx.mailbox) {
            if self.lenient && existing.account_id.is_empty() {
                existing.account_id = account_id.to_string();
                return Ok(());
            }
            return Err(StoreError::already_exists(
                ctx.mailbox,
                format!("mailbox for {}", account_id),
            ));
        }
        state.mailboxes.insert(
            ctx.mailbox,
            MailboxState {
                account_id: account_id.to_string(),
                ..MailboxState::default()
            },
        );
        tracing::trace!(mailbox = %ctx.mailbox, account = account_id, "Created mailbox");
        Ok(())
    }

    fn create_folder(&self, ctx: &OperationContext, folder: &NewFolder) -> StoreResult<()> {
        self.with_mailbox(ctx.mailbox, |m| {
            if m.items.contains_key(&folder.id) {
                return Err(StoreError::already_exists(
                    ctx.mailbox,
                    format!("folder {}", folder.id),
                ));
            }
            m.items.insert(
                folder.id,
                StoredItem {
                    item_type: ItemType::Folder,
                    folder_id: folder.parent_id,
                    name: folder.name.clone(),
                    flags: 0,
                    tags: Vec::new(),
                    size: 0,
                    change_id: ctx.change_id,
                    replies: 0,
                },
            );
            Ok(())
        })
    }

    fn create_message(
        &self,
        ctx: &OperationContext,
        message: &NewMessage,
        content: &[u8],
    ) -> StoreResult<()> {
        self.with_mailbox(ctx.mailbox, |m| {
            if m.items.contains_key(&message.id) {
                return Err(StoreError::already_exists(
                    ctx.mailbox,
                    format!("message {}", message.id),
                ));
            }
            m.items.insert(
                message.id,
                StoredItem {
                    item_type: ItemType::Message,
                    folder_id: message.folder_id,
                    name: message.digest.clone(),
                    flags: message.flags,
                    tags: message.tags.clone(),
                    size: content.len(),
                    change_id: ctx.change_id,
                    replies: 0,
                },
            );
            Ok(())
        })
    }

    fn delete_items(
        &self,
        ctx: &OperationContext,
        ids: &[ItemId],
        _item_type: ItemType,
    ) -> StoreResult<()> {
        self.with_mailbox(ctx.mailbox, |m| {
            let gone = missing(ctx, m, ids);
            for id in ids {
                m.items.remove(id);
                m.indexed.remove(id);
            }
            gone.map_or(Ok(()), Err)
        })
    }

    fn move_items(
        &self,
        ctx: &OperationContext,
        ids: &[ItemId],
        _item_type: ItemType,
        target_folder: ItemId,
    ) -> StoreResult<()> {
        self.with_mailbox(ctx.mailbox, |m| {
            if let Some(err) = missing(ctx, m, ids) {
                return Err(err);
            }
            for id in ids {
                if let Some(item) = m.items.get(id) {
                    check_constraint(ctx, *id, item)?;
                }
            }
            for id in ids {
                if let Some(item) = m.items.get_mut(id) {
                    item.folder_id = target_folder;
                    item.change_id = ctx.change_id;
                }
            }
            Ok(())
        })
    }

    fn set_tags(
        &self,
        ctx: &OperationContext,
        ids: &[ItemId],
        _item_type: ItemType,
        tags: &[String],
    ) -> StoreResult<()> {
        self.with_mailbox(ctx.mailbox, |m| {
            if let Some(err) = missing(ctx, m, ids) {
                return Err(err);
            }
            for id in ids {
                if let Some(item) = m.items.get(id) {
                    check_constraint(ctx, *id, item)?;
                }
            }
            for id in ids {
                if let Some(item) = m.items.get_mut(id) {
                    item.tags = tags.to_vec();
                    item.change_id = ctx.change_id;
                }
            }
            Ok(())
        })
    }

    fn index_item(
        &self,
        ctx: &OperationContext,
        id: ItemId,
        _item_type: ItemType,
        delete_first: bool,
    ) -> StoreResult<()> {
        self.with_mailbox(ctx.mailbox, |m| {
            if !m.items.contains_key(&id) {
                return Err(StoreError::NoSuchItem {
                    mailbox: ctx.mailbox,
                    item: id,
                });
            }
            if delete_first {
                m.indexed.remove(&id);
            }
            m.indexed.insert(id);
            Ok(())
        })
    }

    fn store_incoming_blob(
        &self,
        ctx: &OperationContext,
        digest: &str,
        recipients: &[MailboxId],
        content: &[u8],
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        if state.blobs.contains_key(digest) {
            return Err(StoreError::already_exists(
                ctx.mailbox,
                format!("blob {}", digest),
            ));
        }
        state.blobs.insert(
            digest.to_string(),
            SharedBlob {
                recipients: recipients.to_vec(),
                size: content.len(),
            },
        );
        Ok(())
    }

    fn reindex_mailbox(&self, ctx: &OperationContext, types: &[ItemType]) -> StoreResult<()> {
        self.with_mailbox(ctx.mailbox, |m| {
            let ids: Vec<ItemId> = m
                .items
                .iter()
                .filter(|(_, item)| types.is_empty() || types.contains(&item.item_type))
                .map(|(id, _)| *id)
                .collect();
            m.indexed.extend(ids);
            m.reindexes += 1;
            Ok(())
        })
    }

    fn set_calendar_item(
        &self,
        ctx: &OperationContext,
        item: &NewCalendarItem,
    ) -> StoreResult<()> {
        self.with_mailbox(ctx.mailbox, |m| {
            m.items.insert(
                item.id,
                StoredItem {
                    item_type: ItemType::Appointment,
                    folder_id: item.folder_id,
                    name: item.uid.clone(),
                    flags: 0,
                    tags: Vec::new(),
                    size: 0,
                    change_id: ctx.change_id,
                    replies: item.replies.len(),
                },
            );
            Ok(())
        })
    }
}

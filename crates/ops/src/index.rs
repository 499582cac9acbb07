//! Search index maintenance.
//!
//! [`IndexItem`] is logged as a chained child of the operation that created
//! the item, so it never commits ahead of it. [`ReindexMailbox`] can run for
//! a long time and is held back during crash recovery until the service is up.

use crate::codec::{read_item_type, read_item_types, write_item_type, write_item_types};
use crate::opcodes;
use std::any::Any;
use zredo_core::{gates, ItemId, ItemType, MailboxStore, OperationContext, StoreResult};
use zredo_durability::{CodecError, Opcode, RedoInput, RedoOp, RedoOutput};

/// Index one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexItem {
    /// Item to index
    pub item_id: ItemId,
    /// Its type
    pub item_type: ItemType,
    /// Drop existing index entries first (absent before 1.4, read as false)
    pub delete_first: bool,
}

impl Default for IndexItem {
    fn default() -> Self {
        IndexItem {
            item_id: 0,
            item_type: ItemType::Unknown,
            delete_first: false,
        }
    }
}

impl IndexItem {
    /// Index `item_id`
    pub fn new(item_id: ItemId, item_type: ItemType) -> Self {
        IndexItem {
            item_id,
            item_type,
            delete_first: false,
        }
    }

    /// Re-index, removing stale entries first
    pub fn reindex(item_id: ItemId, item_type: ItemType) -> Self {
        IndexItem {
            delete_first: true,
            ..IndexItem::new(item_id, item_type)
        }
    }
}

impl RedoOp for IndexItem {
    fn opcode(&self) -> Opcode {
        opcodes::INDEX_ITEM
    }

    fn print_body(&self) -> String {
        format!(
            "id={}, type={}, deleteFirst={}",
            self.item_id, self.item_type, self.delete_first
        )
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32(self.item_id);
        write_item_type(out, self.item_type);
        if out.version().has(gates::INDEX_DELETE_FIRST) {
            out.write_bool(self.delete_first);
        }
        Ok(())
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.item_id = input.read_i32()?;
        self.item_type = read_item_type(input)?;
        self.delete_first = if input.version().has(gates::INDEX_DELETE_FIRST) {
            input.read_bool()?
        } else {
            false
        };
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        store.index_item(ctx, self.item_id, self.item_type, self.delete_first)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Rebuild a mailbox's search index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexMailbox {
    /// Types to rebuild; empty means all
    pub types: Vec<ItemType>,
}

impl ReindexMailbox {
    /// Rebuild entries of `types`
    pub fn new(types: Vec<ItemType>) -> Self {
        ReindexMailbox { types }
    }
}

impl RedoOp for ReindexMailbox {
    fn opcode(&self) -> Opcode {
        opcodes::REINDEX_MAILBOX
    }

    fn print_body(&self) -> String {
        if self.types.is_empty() {
            return "types=all".to_string();
        }
        let types: Vec<String> = self.types.iter().map(|t| t.to_string()).collect();
        format!("types={}", types.join(","))
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        write_item_types(out, &self.types)
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.types = read_item_types(input)?;
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        store.reindex_mailbox(ctx, &self.types)
    }

    fn defer_crash_recovery(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

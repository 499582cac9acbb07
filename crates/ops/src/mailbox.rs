//! Mailbox structure operations: mailbox and folder creation, delete, move,
//! and tagging.

use crate::codec::{join_ids, read_item_type, write_item_type};
use crate::opcodes;
use std::any::Any;
use zredo_core::{ItemId, ItemType, MailboxStore, NewFolder, OperationContext, StoreResult};
use zredo_durability::{CodecError, Opcode, RedoInput, RedoOp, RedoOutput};

// ============================================================================
// CreateMailbox
// ============================================================================

/// Create the mailbox for an account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateMailbox {
    /// Owning account
    pub account_id: String,
}

impl CreateMailbox {
    /// Mailbox for `account_id`
    pub fn new(account_id: impl Into<String>) -> Self {
        CreateMailbox {
            account_id: account_id.into(),
        }
    }
}

impl RedoOp for CreateMailbox {
    fn opcode(&self) -> Opcode {
        opcodes::CREATE_MAILBOX
    }

    fn print_body(&self) -> String {
        format!("account={}", self.account_id)
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_str(&self.account_id)
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.account_id = input.read_str()?;
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        store.create_mailbox(ctx, &self.account_id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// CreateFolder
// ============================================================================

/// Create a folder with the id it was assigned originally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateFolder {
    /// Parent folder
    pub parent_id: ItemId,
    /// Folder name
    pub name: String,
    /// Assigned folder id
    pub folder_id: ItemId,
    /// Default view
    pub view: Option<String>,
}

impl CreateFolder {
    /// Folder `name` under `parent_id`, assigned `folder_id`
    pub fn new(parent_id: ItemId, name: impl Into<String>, folder_id: ItemId) -> Self {
        CreateFolder {
            parent_id,
            name: name.into(),
            folder_id,
            view: None,
        }
    }

    /// Set the default view
    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }
}

impl RedoOp for CreateFolder {
    fn opcode(&self) -> Opcode {
        opcodes::CREATE_FOLDER
    }

    fn print_body(&self) -> String {
        format!(
            "parent={}, name={}, id={}, view={}",
            self.parent_id,
            self.name,
            self.folder_id,
            self.view.as_deref().unwrap_or("-")
        )
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32(self.parent_id);
        out.write_str(&self.name)?;
        out.write_i32(self.folder_id);
        out.write_opt_str(self.view.as_deref())
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.parent_id = input.read_i32()?;
        self.name = input.read_str()?;
        self.folder_id = input.read_i32()?;
        self.view = input.read_opt_str()?;
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        store.create_folder(
            ctx,
            &NewFolder {
                id: self.folder_id,
                parent_id: self.parent_id,
                name: self.name.clone(),
                view: self.view.clone(),
            },
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// DeleteItem
// ============================================================================

/// Delete items of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteItem {
    /// Items to delete
    pub ids: Vec<ItemId>,
    /// Their type
    pub item_type: ItemType,
}

impl Default for DeleteItem {
    fn default() -> Self {
        DeleteItem {
            ids: Vec::new(),
            item_type: ItemType::Unknown,
        }
    }
}

impl DeleteItem {
    /// Delete `ids`
    pub fn new(ids: Vec<ItemId>, item_type: ItemType) -> Self {
        DeleteItem { ids, item_type }
    }
}

impl RedoOp for DeleteItem {
    fn opcode(&self) -> Opcode {
        opcodes::DELETE_ITEM
    }

    fn print_body(&self) -> String {
        format!("ids={}, type={}", join_ids(&self.ids), self.item_type)
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32_list(&self.ids)?;
        write_item_type(out, self.item_type);
        Ok(())
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.ids = input.read_i32_list()?;
        self.item_type = read_item_type(input)?;
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        store.delete_items(ctx, &self.ids, self.item_type)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// MoveItem
// ============================================================================

/// Move items into a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveItem {
    /// Items to move
    pub ids: Vec<ItemId>,
    /// Their type
    pub item_type: ItemType,
    /// Destination folder
    pub target_folder: ItemId,
}

impl Default for MoveItem {
    fn default() -> Self {
        MoveItem {
            ids: Vec::new(),
            item_type: ItemType::Unknown,
            target_folder: 0,
        }
    }
}

impl MoveItem {
    /// Move `ids` into `target_folder`
    pub fn new(ids: Vec<ItemId>, item_type: ItemType, target_folder: ItemId) -> Self {
        MoveItem {
            ids,
            item_type,
            target_folder,
        }
    }
}

impl RedoOp for MoveItem {
    fn opcode(&self) -> Opcode {
        opcodes::MOVE_ITEM
    }

    fn print_body(&self) -> String {
        format!(
            "ids={}, type={}, target={}",
            join_ids(&self.ids),
            self.item_type,
            self.target_folder
        )
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32_list(&self.ids)?;
        write_item_type(out, self.item_type);
        out.write_i32(self.target_folder);
        Ok(())
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.ids = input.read_i32_list()?;
        self.item_type = read_item_type(input)?;
        self.target_folder = input.read_i32()?;
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        store.move_items(ctx, &self.ids, self.item_type, self.target_folder)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// SetItemTags
// ============================================================================

/// Replace the tags of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetItemTags {
    /// Tagged items
    pub ids: Vec<ItemId>,
    /// Their type
    pub item_type: ItemType,
    /// New tag set
    pub tags: Vec<String>,
}

impl Default for SetItemTags {
    fn default() -> Self {
        SetItemTags {
            ids: Vec::new(),
            item_type: ItemType::Unknown,
            tags: Vec::new(),
        }
    }
}

impl SetItemTags {
    /// Set `tags` on `ids`
    pub fn new(ids: Vec<ItemId>, item_type: ItemType, tags: Vec<String>) -> Self {
        SetItemTags {
            ids,
            item_type,
            tags,
        }
    }
}

impl RedoOp for SetItemTags {
    fn opcode(&self) -> Opcode {
        opcodes::SET_ITEM_TAGS
    }

    fn print_body(&self) -> String {
        format!(
            "ids={}, type={}, tags=[{}]",
            join_ids(&self.ids),
            self.item_type,
            self.tags.join(",")
        )
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32_list(&self.ids)?;
        write_item_type(out, self.item_type);
        out.write_str_list(&self.tags)
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.ids = input.read_i32_list()?;
        self.item_type = read_item_type(input)?;
        self.tags = input.read_str_list()?;
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        store.set_tags(ctx, &self.ids, self.item_type, &self.tags)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

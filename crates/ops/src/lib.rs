//! Mailbox operation catalog
//!
//! Each mutating mailbox operation is a [`RedoOp`] variant that knows how to
//! serialize itself and how to re-apply itself to a [`zredo_core::MailboxStore`].
//!
//! | Opcode | Variant | Table |
//! |--------|---------|-------|
//! | 10 | [`CreateMailbox`] | mailbox |
//! | 12 | [`CreateFolder`] | mailbox |
//! | 13 | [`CreateMessage`] | mailbox |
//! | 14 | [`DeleteItem`] | mailbox |
//! | 15 | [`MoveItem`] | mailbox |
//! | 16 | [`SetItemTags`] | mailbox |
//! | 17 | [`IndexItem`] | mailbox |
//! | 18 | [`StoreIncomingBlob`] | mailbox |
//! | 19 | [`ReindexMailbox`] | mailbox |
//! | 30 | [`SetCalendarItem`] | calendar |
//!
//! The mailbox table is merged into a registry's base registrations. The
//! calendar table is attached at runtime so the calendar module can be
//! detached on shutdown.
//!
//! ```ignore
//! use zredo_ops::{default_registry, CreateFolder};
//!
//! let registry = default_registry()?;
//! let mut rec = LogRecord::new(Box::new(CreateFolder::new(1, "Inbox", 2)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codec;

pub mod calendar;
pub mod index;
pub mod mailbox;
pub mod message;
pub mod testing;

pub use calendar::SetCalendarItem;
pub use index::{IndexItem, ReindexMailbox};
pub use mailbox::{CreateFolder, CreateMailbox, DeleteItem, MoveItem, SetItemTags};
pub use message::{CreateMessage, StoreIncomingBlob};

use zredo_durability::{OpRegistry, OpTable, Opcode, RedoOp, RegistryError};

/// Opcodes of the catalog
pub mod opcodes {
    use zredo_durability::Opcode;

    /// [`crate::CreateMailbox`]
    pub const CREATE_MAILBOX: Opcode = Opcode(10);
    /// [`crate::CreateFolder`]
    pub const CREATE_FOLDER: Opcode = Opcode(12);
    /// [`crate::CreateMessage`]
    pub const CREATE_MESSAGE: Opcode = Opcode(13);
    /// [`crate::DeleteItem`]
    pub const DELETE_ITEM: Opcode = Opcode(14);
    /// [`crate::MoveItem`]
    pub const MOVE_ITEM: Opcode = Opcode(15);
    /// [`crate::SetItemTags`]
    pub const SET_ITEM_TAGS: Opcode = Opcode(16);
    /// [`crate::IndexItem`]
    pub const INDEX_ITEM: Opcode = Opcode(17);
    /// [`crate::StoreIncomingBlob`]
    pub const STORE_INCOMING_BLOB: Opcode = Opcode(18);
    /// [`crate::ReindexMailbox`]
    pub const REINDEX_MAILBOX: Opcode = Opcode(19);
    /// [`crate::SetCalendarItem`]
    pub const SET_CALENDAR_ITEM: Opcode = Opcode(30);
}

/// Name of the mailbox table
pub const MAILBOX_TABLE: &str = "mailbox";

/// Name of the attachable calendar table
pub const CALENDAR_TABLE: &str = "calendar";

fn make<T: RedoOp + Default>() -> Box<dyn RedoOp> {
    Box::new(T::default())
}

/// Table of the core mailbox operations.
pub fn mailbox_ops() -> Result<OpTable, RegistryError> {
    let mut table = OpTable::new(MAILBOX_TABLE);
    let entries: [(Opcode, &'static str, fn() -> Box<dyn RedoOp>); 9] = [
        (opcodes::CREATE_MAILBOX, "CreateMailbox", make::<CreateMailbox>),
        (opcodes::CREATE_FOLDER, "CreateFolder", make::<CreateFolder>),
        (opcodes::CREATE_MESSAGE, "CreateMessage", make::<CreateMessage>),
        (opcodes::DELETE_ITEM, "DeleteItem", make::<DeleteItem>),
        (opcodes::MOVE_ITEM, "MoveItem", make::<MoveItem>),
        (opcodes::SET_ITEM_TAGS, "SetItemTags", make::<SetItemTags>),
        (opcodes::INDEX_ITEM, "IndexItem", make::<IndexItem>),
        (opcodes::STORE_INCOMING_BLOB, "StoreIncomingBlob", make::<StoreIncomingBlob>),
        (opcodes::REINDEX_MAILBOX, "ReindexMailbox", make::<ReindexMailbox>),
    ];
    for (opcode, name, factory) in entries {
        table.register(opcode, name, factory)?;
    }
    Ok(table)
}

/// Table of the calendar module's operations.
pub fn calendar_ops() -> Result<OpTable, RegistryError> {
    let mut table = OpTable::new(CALENDAR_TABLE);
    table.register(
        opcodes::SET_CALENDAR_ITEM,
        "SetCalendarItem",
        make::<SetCalendarItem>,
    )?;
    Ok(table)
}

/// Registry with the control records, the mailbox table, and the calendar
/// table attached.
pub fn default_registry() -> Result<OpRegistry, RegistryError> {
    let registry = OpRegistry::new().with_table(mailbox_ops()?)?;
    registry.attach(calendar_ops()?)?;
    Ok(registry)
}

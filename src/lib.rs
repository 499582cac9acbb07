//! zredo - write-ahead redo log for a mailbox store
//!
//! Every mutating mailbox operation is written to a durable log as a
//! versioned record before it takes effect, and committed records are
//! replayed after a crash.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use zredo::{default_registry, CreateFolder, LogManager, LogRecord, RedoConfig};
//!
//! let manager = Arc::new(LogManager::open(
//!     RedoConfig::default().with_dir("/var/mail/redolog"),
//!     Arc::new(default_registry()?),
//! )?);
//! manager.start(store)?;
//!
//! let mut rec = LogRecord::new(Box::new(CreateFolder::new(1, "Projects", 257)));
//! rec.set_mailbox_id(mailbox)?;
//! rec.start(&*manager, zredo::now_millis());
//! let rec = Arc::new(rec);
//! rec.log(&*manager, false)?;
//! // ... apply the change to the store ...
//! rec.commit(&*manager)?;
//! ```
//!
//! # Crates
//!
//! - `zredo-core`: identifiers, versions and gates, the [`MailboxStore`] trait
//! - `zredo-durability`: records, the log manager, segment files, replay
//! - `zredo-ops`: the mailbox operation catalog and its registry

pub use zredo_core::*;
pub use zredo_durability::*;
pub use zredo_ops::{
    calendar_ops, default_registry, mailbox_ops, opcodes, CreateFolder, CreateMailbox,
    CreateMessage, DeleteItem, IndexItem, MoveItem, ReindexMailbox, SetCalendarItem, SetItemTags,
    StoreIncomingBlob, CALENDAR_TABLE, MAILBOX_TABLE,
};

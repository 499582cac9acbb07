//! Identifier types for the redo log
//!
//! - MailboxId: which mailbox a record applies to (or all of them)
//! - ItemId / ItemType: the mail items operations create and mutate
//! - TransactionId: identity of one logged transaction within a log stream

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Identifier of a mailbox.
///
/// Two values are reserved: [`MailboxId::UNSET`] for records whose mailbox
/// has not been assigned yet, and [`MailboxId::ALL`] for records that apply
/// to every mailbox (for example a shared incoming blob).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MailboxId(pub i64);

impl MailboxId {
    /// No mailbox assigned yet
    pub const UNSET: MailboxId = MailboxId(0);

    /// Record applies to all mailboxes
    pub const ALL: MailboxId = MailboxId(-1);

    /// Raw numeric value
    pub const fn get(self) -> i64 {
        self.0
    }

    /// True unless this is [`MailboxId::UNSET`]
    pub const fn is_set(self) -> bool {
        self.0 != Self::UNSET.0
    }

    /// True for the all-mailboxes sentinel
    pub const fn is_all(self) -> bool {
        self.0 == Self::ALL.0
    }
}

impl Default for MailboxId {
    fn default() -> Self {
        MailboxId::UNSET
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            write!(f, "ALL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Identifier of an item inside a mailbox.
pub type ItemId = i32;

/// Kind of mail item an operation targets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    /// Type not recorded
    Unknown = 0,
    /// Folder
    Folder = 1,
    /// Tag
    Tag = 2,
    /// Conversation
    Conversation = 3,
    /// Message
    Message = 4,
    /// Contact
    Contact = 5,
    /// Appointment
    Appointment = 6,
    /// Task
    Task = 7,
    /// Document
    Document = 8,
}

impl ItemType {
    /// Byte value used on the wire
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte; unknown values map to [`ItemType::Unknown`]
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => ItemType::Folder,
            2 => ItemType::Tag,
            3 => ItemType::Conversation,
            4 => ItemType::Message,
            5 => ItemType::Contact,
            6 => ItemType::Appointment,
            7 => ItemType::Task,
            8 => ItemType::Document,
            _ => ItemType::Unknown,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemType::Unknown => "unknown",
            ItemType::Folder => "folder",
            ItemType::Tag => "tag",
            ItemType::Conversation => "conversation",
            ItemType::Message => "message",
            ItemType::Contact => "contact",
            ItemType::Appointment => "appointment",
            ItemType::Task => "task",
            ItemType::Document => "document",
        };
        f.write_str(name)
    }
}

/// Transaction identifier within one log stream.
///
/// Made of the wall-clock second at which the generator was seeded and a
/// counter. Ordering is by `(time, counter)`, which matches allocation order
/// for ids from one generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// Generator seed time (seconds since epoch)
    pub time: i32,
    /// Counter within the seed period (starts at 1)
    pub counter: i32,
}

impl TransactionId {
    /// Id carried by records that never started a transaction
    pub const NONE: TransactionId = TransactionId {
        time: 0,
        counter: 0,
    };

    /// Create a transaction id
    pub const fn new(time: i32, counter: i32) -> Self {
        TransactionId { time, counter }
    }

    /// True if this is [`TransactionId::NONE`]
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        TransactionId::NONE
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.time, self.counter)
    }
}

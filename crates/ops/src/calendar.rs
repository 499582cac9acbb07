//! Calendar module operations
//!
//! Registered through [`crate::calendar_ops`], a table the calendar module
//! attaches at startup and detaches on shutdown.
//!
//! ## Replies list
//!
//! | Stream version | Encoding |
//! |----------------|----------|
//! | < 1.1 | absent, read as empty |
//! | 1.1, 1.2 | `count:i32` then entries; a count above [`MAX_LEGACY_REPLIES`] means the writer emitted garbage |
//! | >= 1.3 | `count:i32` then entries |

use crate::opcodes;
use std::any::Any;
use zredo_core::{
    gates, CalendarReply, ItemId, MailboxStore, NewCalendarItem, OperationContext, StoreResult,
};
use zredo_durability::{CodecError, Opcode, RedoInput, RedoOp, RedoOutput};

/// Largest replies count trusted from a stream in `[1.1, 1.3)`.
pub const MAX_LEGACY_REPLIES: usize = 10_000;

/// Create or replace a calendar item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetCalendarItem {
    /// Item id
    pub item_id: ItemId,
    /// Calendar folder
    pub folder_id: ItemId,
    /// iCalendar UID
    pub uid: String,
    /// Attendee replies
    pub replies: Vec<CalendarReply>,
}

impl SetCalendarItem {
    /// Calendar item without replies
    pub fn new(item_id: ItemId, folder_id: ItemId, uid: impl Into<String>) -> Self {
        SetCalendarItem {
            item_id,
            folder_id,
            uid: uid.into(),
            replies: Vec::new(),
        }
    }

    /// Add an attendee reply
    pub fn with_reply(
        mut self,
        attendee: impl Into<String>,
        status: impl Into<String>,
        sequence: i32,
        timestamp: i64,
    ) -> Self {
        self.replies.push(CalendarReply {
            attendee: attendee.into(),
            status: status.into(),
            sequence,
            timestamp,
        });
        self
    }

    fn read_replies(input: &mut RedoInput<'_>) -> Result<Vec<CalendarReply>, CodecError> {
        let count = input.read_count()?;
        let legacy = input
            .version()
            .within(gates::CALENDAR_REPLIES, gates::REPLIES_COUNT_FIXED);
        if legacy && count > MAX_LEGACY_REPLIES {
            return Err(CodecError::corrupt(format!(
                "calendar replies count {} at version {} exceeds {}",
                count,
                input.version(),
                MAX_LEGACY_REPLIES
            )));
        }
        // each reply needs at least 20 bytes
        let mut replies = Vec::with_capacity(count.min(input.remaining() / 20));
        for _ in 0..count {
            replies.push(CalendarReply {
                attendee: input.read_str()?,
                status: input.read_str()?,
                sequence: input.read_i32()?,
                timestamp: input.read_i64()?,
            });
        }
        Ok(replies)
    }
}

impl RedoOp for SetCalendarItem {
    fn opcode(&self) -> Opcode {
        opcodes::SET_CALENDAR_ITEM
    }

    fn print_body(&self) -> String {
        format!(
            "id={}, folder={}, uid={}, replies={}",
            self.item_id,
            self.folder_id,
            self.uid,
            self.replies.len()
        )
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32(self.item_id);
        out.write_i32(self.folder_id);
        out.write_str(&self.uid)?;
        if out.version().has(gates::CALENDAR_REPLIES) {
            let count = i32::try_from(self.replies.len()).map_err(|_| CodecError::Unencodable {
                version: out.version(),
                detail: format!("{} calendar replies", self.replies.len()),
            })?;
            out.write_i32(count);
            for reply in &self.replies {
                out.write_str(&reply.attendee)?;
                out.write_str(&reply.status)?;
                out.write_i32(reply.sequence);
                out.write_i64(reply.timestamp);
            }
        }
        Ok(())
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.item_id = input.read_i32()?;
        self.folder_id = input.read_i32()?;
        self.uid = input.read_str()?;
        self.replies = if input.version().has(gates::CALENDAR_REPLIES) {
            Self::read_replies(input)?
        } else {
            Vec::new()
        };
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        store.set_calendar_item(
            ctx,
            &NewCalendarItem {
                id: self.item_id,
                folder_id: self.folder_id,
                uid: self.uid.clone(),
                replies: self.replies.clone(),
            },
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

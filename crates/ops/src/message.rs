//! Operations carrying message content in the side channel.

use crate::codec::{blob_content, read_mailbox_ids, write_mailbox_ids};
use crate::opcodes;
use std::any::Any;
use std::path::Path;
use zredo_core::{ItemId, MailboxId, MailboxStore, NewMessage, OperationContext, StoreResult};
use zredo_durability::{Blob, BlobError, CodecError, Opcode, RedoInput, RedoOp, RedoOutput};

// ============================================================================
// CreateMessage
// ============================================================================

/// Deliver a message into a folder.
///
/// Content travels in the side channel, zstd-compressed when requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateMessage {
    /// Destination folder
    pub folder_id: ItemId,
    /// Assigned message id
    pub message_id: ItemId,
    /// Flag bitmask
    pub flags: i32,
    /// Tags
    pub tags: Vec<String>,
    /// Content digest
    pub digest: String,
    /// Raw message content
    pub content: Blob,
}

impl CreateMessage {
    /// Message with in-memory content.
    pub fn new(
        folder_id: ItemId,
        message_id: ItemId,
        digest: impl Into<String>,
        content: &[u8],
        compress: bool,
    ) -> Result<Self, BlobError> {
        Ok(CreateMessage {
            folder_id,
            message_id,
            flags: 0,
            tags: Vec::new(),
            digest: digest.into(),
            content: Blob::from_bytes(content, compress)?,
        })
    }

    /// Message whose content is read from a spool file when the record is
    /// written.
    pub fn from_file(
        folder_id: ItemId,
        message_id: ItemId,
        digest: impl Into<String>,
        path: &Path,
    ) -> Result<Self, BlobError> {
        Ok(CreateMessage {
            folder_id,
            message_id,
            flags: 0,
            tags: Vec::new(),
            digest: digest.into(),
            content: Blob::from_file(path, false)?,
        })
    }

    /// Set flags and tags
    pub fn with_flags(mut self, flags: i32, tags: Vec<String>) -> Self {
        self.flags = flags;
        self.tags = tags;
        self
    }
}

impl RedoOp for CreateMessage {
    fn opcode(&self) -> Opcode {
        opcodes::CREATE_MESSAGE
    }

    fn print_body(&self) -> String {
        format!(
            "folder={}, id={}, flags={}, tags=[{}], digest={}, size={}, compressed={}",
            self.folder_id,
            self.message_id,
            self.flags,
            self.tags.join(","),
            self.digest,
            self.content.len(),
            self.content.is_compressed()
        )
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32(self.folder_id);
        out.write_i32(self.message_id);
        out.write_i32(self.flags);
        out.write_str_list(&self.tags)?;
        out.write_str(&self.digest)
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.folder_id = input.read_i32()?;
        self.message_id = input.read_i32()?;
        self.flags = input.read_i32()?;
        self.tags = input.read_str_list()?;
        self.digest = input.read_str()?;
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        let content = blob_content(&self.content, "message")?;
        store.create_message(
            ctx,
            &NewMessage {
                id: self.message_id,
                folder_id: self.folder_id,
                flags: self.flags,
                tags: self.tags.clone(),
                digest: self.digest.clone(),
            },
            &content,
        )
    }

    fn blob(&self) -> Option<&Blob> {
        Some(&self.content)
    }

    fn blob_mut(&mut self) -> Option<&mut Blob> {
        Some(&mut self.content)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// StoreIncomingBlob
// ============================================================================

/// Store one copy of an incoming message shared by several recipient
/// mailboxes. Logged with [`MailboxId::ALL`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreIncomingBlob {
    /// Content digest
    pub digest: String,
    /// Recipient mailboxes
    pub recipients: Vec<MailboxId>,
    /// Shared content
    pub content: Blob,
}

impl StoreIncomingBlob {
    /// Shared blob for `recipients`
    pub fn new(
        digest: impl Into<String>,
        recipients: Vec<MailboxId>,
        content: &[u8],
        compress: bool,
    ) -> Result<Self, BlobError> {
        Ok(StoreIncomingBlob {
            digest: digest.into(),
            recipients,
            content: Blob::from_bytes(content, compress)?,
        })
    }
}

impl RedoOp for StoreIncomingBlob {
    fn opcode(&self) -> Opcode {
        opcodes::STORE_INCOMING_BLOB
    }

    fn print_body(&self) -> String {
        let recipients: Vec<String> = self.recipients.iter().map(|m| m.to_string()).collect();
        format!(
            "digest={}, recipients={}, size={}",
            self.digest,
            recipients.join(","),
            self.content.len()
        )
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_str(&self.digest)?;
        write_mailbox_ids(out, &self.recipients)
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.digest = input.read_str()?;
        self.recipients = read_mailbox_ids(input)?;
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        let content = blob_content(&self.content, "incoming blob")?;
        store.store_incoming_blob(ctx, &self.digest, &self.recipients, &content)
    }

    fn blob(&self) -> Option<&Blob> {
        Some(&self.content)
    }

    fn blob_mut(&mut self) -> Option<&mut Blob> {
        Some(&mut self.content)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

use crate::blob::Blob;
use crate::format::{CodecError, RedoInput, RedoOutput};
use crate::op::{OpRegistry, OpTable, Opcode, RedoOp};
use std::any::Any;
use zredo_core::{ItemId, MailboxStore, NewFolder, OperationContext, StoreResult};

/// Minimal start-marker variant. Replays as a folder creation named `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteOp {
    /// Folder id to create
    pub item: ItemId,
    /// Folder name
    pub text: String,
    /// Reported by `defer_crash_recovery`
    pub defer: bool,
    /// Optional side channel
    pub blob: Option<Blob>,
}

impl Default for NoteOp {
    fn default() -> Self {
        NoteOp {
            item: 0,
            text: String::new(),
            defer: false,
            blob: None,
        }
    }
}

impl NoteOp {
    /// Opcode used by the note variant
    pub const OPCODE: Opcode = Opcode(100);

    /// Note with item id 0
    pub fn new(text: impl Into<String>) -> Self {
        NoteOp {
            text: text.into(),
            ..NoteOp::default()
        }
    }

    /// Set the item id
    pub fn with_item(mut self, item: ItemId) -> Self {
        self.item = item;
        self
    }

    /// Mark as deferred for crash recovery
    pub fn deferred(mut self) -> Self {
        self.defer = true;
        self
    }

    /// Attach a blob
    ///
    /// # Panics
    /// If compression fails.
    pub fn with_blob(mut self, content: &[u8], compress: bool) -> Self {
        self.blob = Some(Blob::from_bytes(content, compress).expect("compress test blob"));
        self
    }
}

impl RedoOp for NoteOp {
    fn opcode(&self) -> Opcode {
        Self::OPCODE
    }

    fn print_body(&self) -> String {
        format!("item={}, text={}", self.item, self.text)
    }

    fn encode_payload(&self, out: &mut RedoOutput) -> Result<(), CodecError> {
        out.write_i32(self.item);
        out.write_str(&self.text)?;
        out.write_bool(self.defer);
        out.write_bool(self.blob.is_some());
        Ok(())
    }

    fn decode_payload(&mut self, input: &mut RedoInput<'_>) -> Result<(), CodecError> {
        self.item = input.read_i32()?;
        self.text = input.read_str()?;
        self.defer = input.read_bool()?;
        self.blob = if input.read_bool()? {
            Some(Blob::default())
        } else {
            None
        };
        Ok(())
    }

    fn redo(&self, ctx: &OperationContext, store: &dyn MailboxStore) -> StoreResult<()> {
        store.create_folder(
            ctx,
            &NewFolder {
                id: self.item,
                parent_id: 1,
                name: self.text.clone(),
                view: None,
            },
        )
    }

    fn defer_crash_recovery(&self) -> bool {
        self.defer
    }

    fn blob(&self) -> Option<&Blob> {
        self.blob.as_ref()
    }

    fn blob_mut(&mut self) -> Option<&mut Blob> {
        self.blob.as_mut()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry with the control records and [`NoteOp`].
pub fn note_registry() -> OpRegistry {
    let mut table = OpTable::new("notes");
    table
        .register(NoteOp::OPCODE, "Note", || -> Box<dyn RedoOp> {
            Box::new(NoteOp::default())
        })
        .expect("fresh table");
    OpRegistry::new().with_table(table).expect("no overlap with control ops")
}

//! Field helpers shared by the catalog's payload codecs.

use zredo_core::{ItemType, MailboxId, StoreError};
use zredo_durability::{BlobError, CodecError, RedoInput, RedoOutput};

pub(crate) fn write_item_type(out: &mut RedoOutput, item_type: ItemType) {
    out.write_u8(item_type.to_byte());
}

pub(crate) fn read_item_type(input: &mut RedoInput<'_>) -> Result<ItemType, CodecError> {
    Ok(ItemType::from_byte(input.read_u8()?))
}

pub(crate) fn write_item_types(out: &mut RedoOutput, types: &[ItemType]) -> Result<(), CodecError> {
    let count = i32::try_from(types.len())
        .map_err(|_| CodecError::corrupt(format!("{} item types", types.len())))?;
    out.write_i32(count);
    for t in types {
        write_item_type(out, *t);
    }
    Ok(())
}

pub(crate) fn read_item_types(input: &mut RedoInput<'_>) -> Result<Vec<ItemType>, CodecError> {
    let count = input.read_count()?;
    let mut types = Vec::with_capacity(count.min(input.remaining()));
    for _ in 0..count {
        types.push(read_item_type(input)?);
    }
    Ok(types)
}

pub(crate) fn write_mailbox_ids(out: &mut RedoOutput, ids: &[MailboxId]) -> Result<(), CodecError> {
    let count = i32::try_from(ids.len())
        .map_err(|_| CodecError::corrupt(format!("{} mailbox ids", ids.len())))?;
    out.write_i32(count);
    for id in ids {
        out.write_mailbox_id(*id)?;
    }
    Ok(())
}

pub(crate) fn read_mailbox_ids(input: &mut RedoInput<'_>) -> Result<Vec<MailboxId>, CodecError> {
    let count = input.read_count()?;
    let mut ids = Vec::with_capacity(count.min(input.remaining() / 4));
    for _ in 0..count {
        ids.push(input.read_mailbox_id()?);
    }
    Ok(ids)
}

/// Blob content for a store call.
pub(crate) fn blob_content(
    blob: &zredo_durability::Blob,
    what: &str,
) -> Result<Vec<u8>, StoreError> {
    blob.load_raw()
        .map_err(|e: BlobError| StoreError::Other(format!("{} content unavailable: {}", what, e)))
}

pub(crate) fn join_ids(ids: &[i32]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

//! Patching of an existing container.
//!
//! The writer owns a full copy of the original container and only ever overwrites the byte
//! ranges it is asked to, so regions the format does not describe survive untouched.

use tracing::{debug, instrument, trace};

use crate::error::{Error, Result};
use crate::offset::align_up;
use crate::types::{TocRecord, TOC_RECORD_SIZE};

/// Alignment of inline payload slots
pub const INLINE_SLOT_ALIGNMENT: u64 = 16;

/// Bytes of an inline slot reserved for a payload of `compressed_size`
pub const fn inline_slot(compressed_size: u64) -> u64 {
    align_up(compressed_size, INLINE_SLOT_ALIGNMENT)
}

/// In place editor of a container
#[derive(Debug, Clone)]
pub struct ContainerWriter {
    data: Vec<u8>,
}

impl ContainerWriter {
    /// Start from the original bytes of a container
    pub fn new(data: Vec<u8>) -> Self {
        ContainerWriter { data }
    }

    /// The container as patched so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn range(&mut self, offset: u64, len: u64, what: &str) -> Result<&mut [u8]> {
        let end = offset.saturating_add(len);
        if end > self.data.len() as u64 {
            return Err(Error::Truncated(format!("{what} at {offset:#x}")));
        }
        Ok(&mut self.data[offset as usize..end as usize])
    }

    /// Overwrite the TOC record at `toc_offset`.
    ///
    /// The reserved bytes are kept as they are in the container.
    #[instrument(skip(self), err)]
    pub fn write_record(&mut self, toc_offset: u64, record: &TocRecord) -> Result<()> {
        let bytes = self.range(toc_offset, TOC_RECORD_SIZE, "the toc record")?;
        bytes[0..4].copy_from_slice(&record.raw_offset.to_le_bytes());
        bytes[4..8].copy_from_slice(&record.compressed_size.to_le_bytes());
        bytes[8..12].copy_from_slice(&record.name_offset.to_le_bytes());
        bytes[12..16].copy_from_slice(&record.name_field_count.to_le_bytes());
        bytes[28..32].copy_from_slice(&record.decompressed_size.to_le_bytes());
        trace!(?record, "record written");
        Ok(())
    }

    /// Write `payload` into the inline slot of `reserved` bytes at `offset`, zero filling
    /// the rest of the slot
    #[instrument(skip(self, payload), err, fields(size = payload.len()))]
    pub fn write_inline(&mut self, offset: u64, reserved: u64, payload: &[u8]) -> Result<()> {
        let size = payload.len() as u64;
        if size > reserved {
            return Err(Error::InlineOverflow {
                offset,
                size,
                reserved,
            });
        }
        let available = (self.data.len() as u64).saturating_sub(offset);
        let slot = self.range(offset, reserved.min(available).max(size), "the inline slot")?;
        let (head, rest) = slot.split_at_mut(payload.len());
        head.copy_from_slice(payload);
        rest.fill(0);
        debug!("{size} bytes written at {offset:#x}");
        Ok(())
    }

    /// Replace the null terminated string at `pointer`, which used `old_len` bytes without
    /// its terminator. The remainder is padded with zeros.
    #[instrument(skip(self), err)]
    pub fn write_string(&mut self, pointer: u32, old_len: usize, value: &str) -> Result<()> {
        if value.len() > old_len {
            return Err(Error::NameOverflow(value.to_owned()));
        }
        let slot = self.range(pointer as u64, old_len as u64 + 1, "the name string")?;
        let (head, rest) = slot.split_at_mut(value.len());
        head.copy_from_slice(value.as_bytes());
        rest.fill(0);
        Ok(())
    }
}

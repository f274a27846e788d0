//! Creation of new PRES containers.

use std::io::Cursor;

use binrw::BinWrite;
use tracing::instrument;

use crate::compression::{compress, CompressionMethod};
use crate::error::{Error, Result};
use crate::names::{NameBinding, NameRecord};
use crate::offset::{align_up, InlineMarker, Locator};
use crate::types::{
    GroupDescriptor, PresHeader, TocRecord, GROUP_DESCRIPTOR_SIZE, HEADER_SIZE, TOC_RECORD_SIZE,
};

const INLINE_ALIGNMENT: u64 = 16;

/// An entry to be laid out by [`PresBuilder`]
#[derive(Debug, Clone, PartialEq)]
pub enum BuilderEntry {
    /// Payload stored inside the container
    Inline {
        names: Option<NameRecord>,
        data: Vec<u8>,
        compression: CompressionMethod,
        marker: InlineMarker,
    },
    /// Payload stored elsewhere, only the record and names are written
    External {
        names: Option<NameRecord>,
        locator: Locator,
        compressed_size: u32,
        decompressed_size: u32,
    },
    /// A placeholder that only carries a decompressed size
    Dummy { decompressed_size: u32 },
    /// An all zero record
    Empty,
}

impl BuilderEntry {
    /// Uncompressed inline payload
    pub fn inline(names: NameRecord, data: impl Into<Vec<u8>>) -> Self {
        Self::compressed(names, data, CompressionMethod::None)
    }

    /// Inline payload stored with `compression`
    pub fn compressed(
        names: NameRecord,
        data: impl Into<Vec<u8>>,
        compression: CompressionMethod,
    ) -> Self {
        BuilderEntry::Inline {
            names: Some(names),
            data: data.into(),
            compression,
            marker: InlineMarker::Primary,
        }
    }

    /// Payload living at `locator`
    pub fn external(
        names: NameRecord,
        locator: Locator,
        compressed_size: u32,
        decompressed_size: u32,
    ) -> Self {
        BuilderEntry::External {
            names: Some(names),
            locator,
            compressed_size,
            decompressed_size,
        }
    }
}

/// PRES container generator
///
/// Lays out the header, group table, TOC blocks, name tables and inline payloads of a new
/// container, in that order.
///
/// ```
/// # fn doit() -> gepack_pres::error::Result<()>
/// # {
/// use gepack_pres::builder::{BuilderEntry, PresBuilder};
/// use gepack_pres::names::NameRecord;
///
/// let mut builder = PresBuilder::new();
/// let group = builder.add_group();
/// builder.push(group, BuilderEntry::inline(NameRecord::new("hello").with_type("txt"), *b"Hello"));
///
/// let container = builder.build()?;
/// assert_eq!(&container[..4], b"Pres");
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct PresBuilder {
    header: PresHeader,
    groups: Vec<Vec<BuilderEntry>>,
}

impl PresBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `header`; offsets and counts are still filled in by [`PresBuilder::build`]
    pub fn with_header(mut self, header: PresHeader) -> Self {
        self.header = header;
        self
    }

    /// Append an empty group and return its index
    pub fn add_group(&mut self) -> usize {
        self.groups.push(Vec::new());
        self.groups.len() - 1
    }

    /// Append `entry` to `group`
    pub fn push(&mut self, group: usize, entry: BuilderEntry) -> &mut Self {
        self.groups[group].push(entry);
        self
    }

    /// Lay out the container
    #[instrument(skip(self), err)]
    pub fn build(&self) -> Result<Vec<u8>> {
        let group_count = u8::try_from(self.groups.len())
            .map_err(|_| Error::CustomError(format!("{} groups", self.groups.len())))?;

        let mut out = vec![0u8; HEADER_SIZE as usize];
        out.resize(
            (HEADER_SIZE + self.groups.len() as u64 * GROUP_DESCRIPTOR_SIZE) as usize,
            0,
        );

        let mut descriptors = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let entry_offset = align_up(out.len() as u64, INLINE_ALIGNMENT);
            out.resize(
                (entry_offset + group.len() as u64 * TOC_RECORD_SIZE) as usize,
                0,
            );
            descriptors.push(GroupDescriptor {
                entry_offset: entry_offset as u32,
                entry_count: group.len() as u32,
            });
        }

        let mut chunk_datas_offset = 0;
        for (group, descriptor) in self.groups.iter().zip(&descriptors) {
            for (index, entry) in group.iter().enumerate() {
                let record = match entry {
                    BuilderEntry::Inline {
                        names,
                        data,
                        compression,
                        marker,
                    } => {
                        let (name_offset, name_field_count) = write_names(&mut out, names)?;
                        let stored = compress(data, *compression)?;
                        let offset = align_up(out.len() as u64, INLINE_ALIGNMENT);
                        if chunk_datas_offset == 0 {
                            chunk_datas_offset = offset as u32;
                        }
                        out.resize(offset as usize, 0);
                        out.extend_from_slice(&stored);
                        out.resize(align_up(out.len() as u64, INLINE_ALIGNMENT) as usize, 0);
                        TocRecord {
                            raw_offset: Locator::inline(*marker, offset)?.to_raw()?,
                            compressed_size: stored.len() as u32,
                            name_offset,
                            name_field_count,
                            decompressed_size: data.len() as u32,
                            ..Default::default()
                        }
                    }
                    BuilderEntry::External {
                        names,
                        locator,
                        compressed_size,
                        decompressed_size,
                    } => {
                        let (name_offset, name_field_count) = write_names(&mut out, names)?;
                        TocRecord {
                            raw_offset: locator.to_raw()?,
                            compressed_size: *compressed_size,
                            name_offset,
                            name_field_count,
                            decompressed_size: *decompressed_size,
                            ..Default::default()
                        }
                    }
                    BuilderEntry::Dummy { decompressed_size } => TocRecord {
                        decompressed_size: *decompressed_size,
                        ..Default::default()
                    },
                    BuilderEntry::Empty => TocRecord::default(),
                };
                let at = descriptor.record_offset(index as u32) as usize;
                record.write(&mut Cursor::new(&mut out[at..at + TOC_RECORD_SIZE as usize]))?;
            }
        }

        let header = PresHeader {
            group_offset: HEADER_SIZE as i32,
            group_count,
            chunk_datas_offset,
            ..self.header
        };
        header.write(&mut Cursor::new(&mut out[..HEADER_SIZE as usize]))?;
        for (i, descriptor) in descriptors.iter().enumerate() {
            let at = (HEADER_SIZE + i as u64 * GROUP_DESCRIPTOR_SIZE) as usize;
            descriptor.write(&mut Cursor::new(
                &mut out[at..at + GROUP_DESCRIPTOR_SIZE as usize],
            ))?;
        }

        Ok(out)
    }
}

/// Append a name table and its strings, returning the table's offset and field count
fn write_names(out: &mut Vec<u8>, names: &Option<NameRecord>) -> Result<(u32, u32)> {
    let Some(names) = names else {
        return Ok((0, 0));
    };
    let field_count = names.field_count();
    let table = align_up(out.len() as u64, 4) as usize;
    out.resize(table + field_count as usize * 4, 0);

    for (slot, value) in names.bound_fields(field_count, NameBinding::Path) {
        let Some(value) = value else {
            continue;
        };
        let pointer = out.len() as u32;
        out.extend_from_slice(value.as_bytes());
        out.push(0);
        out[table + slot * 4..table + slot * 4 + 4].copy_from_slice(&pointer.to_le_bytes());
    }

    Ok((table as u32, field_count))
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinRead;
    use pretty_assertions::{assert_eq, assert_str_eq};
    use tracing_test::traced_test;

    use crate::builder::{BuilderEntry, PresBuilder};
    use crate::error::Result;
    use crate::names::NameRecord;
    use crate::offset::{BlobKind, Locator};
    use crate::types::{GroupDescriptor, PresHeader, TocRecord};

    #[traced_test]
    #[test]
    fn build_empty_container() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            0x50, 0x72, 0x65, 0x73,
            0x20, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let result = PresBuilder::new().build()?;
        assert_str_eq!(format!("{:02X?}", result), format!("{:02X?}", expected));

        Ok(())
    }

    #[traced_test]
    #[test]
    fn build_inline_entry() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            // Header
            0x50, 0x72, 0x65, 0x73,
            0x20, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x60, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // Groups
            0x30, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // Records
            0x60, 0x00, 0x00, 0xC0,
            0x05, 0x00, 0x00, 0x00,
            0x50, 0x00, 0x00, 0x00,
            0x03, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x05, 0x00, 0x00, 0x00,
            // Names
            0x5C, 0x00, 0x00, 0x00,
            0x5E, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            b'a', 0x00, b'b', 0x00,
            // Data
            b'H', b'e', b'l', b'l',
            b'o', 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let mut builder = PresBuilder::new();
        let group = builder.add_group();
        builder.push(
            group,
            BuilderEntry::inline(NameRecord::new("a").with_type("b"), *b"Hello"),
        );

        let result = builder.build()?;
        assert_str_eq!(format!("{:02X?}", result), format!("{:02X?}", expected));

        Ok(())
    }

    #[test]
    fn build_external_and_placeholder_records() -> Result<()> {
        let mut builder = PresBuilder::new();
        let first = builder.add_group();
        let second = builder.add_group();
        builder
            .push(
                first,
                BuilderEntry::external(
                    NameRecord::new("tex").with_type("dds"),
                    Locator::blob(BlobKind::Patch, 0x1000)?,
                    0x20,
                    0x40,
                ),
            )
            .push(first, BuilderEntry::Empty)
            .push(second, BuilderEntry::Dummy { decompressed_size: 9 });

        let result = builder.build()?;
        let mut cursor = Cursor::new(&result);

        let header = PresHeader::read(&mut cursor)?;
        assert_eq!(header.group_count, 2);
        let groups: Vec<GroupDescriptor> = (0..2)
            .map(|_| GroupDescriptor::read(&mut cursor))
            .collect::<binrw::BinResult<_>>()?;
        assert_eq!(groups[0].entry_count, 2);
        assert_eq!(groups[1].entry_offset, groups[0].entry_offset + 64);

        cursor.set_position(groups[0].entry_offset as u64);
        let record = TocRecord::read(&mut cursor)?;
        assert_eq!(record.raw_offset, 0x6000_0002);
        assert_eq!(record.compressed_size, 0x20);
        assert_eq!(TocRecord::read(&mut cursor)?, TocRecord::default());

        cursor.set_position(groups[1].entry_offset as u64);
        assert_eq!(
            TocRecord::read(&mut cursor)?,
            TocRecord {
                decompressed_size: 9,
                ..Default::default()
            }
        );

        Ok(())
    }
}

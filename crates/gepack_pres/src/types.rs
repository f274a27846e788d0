//! Base types for structure of PRES containers.

use binrw::{BinRead, BinWrite};
use serde::{Deserialize, Serialize};

use crate::offset::Locator;

/// Space reserved for the header at the start of a container
pub const HEADER_SIZE: u64 = 32;

/// Bytes of [`PresHeader`] on disk, a container shorter than this is rejected
pub const HEADER_LEN: u64 = 28;

/// Size of one group descriptor
pub const GROUP_DESCRIPTOR_SIZE: u64 = 8;

/// Size of one TOC record
pub const TOC_RECORD_SIZE: u64 = 32;

/// Magic at the start of every PRES container, `"Pres"`
pub const PRES_MAGIC: [u8; 4] = *b"Pres";

/// PRES container header
///
/// Every container starts with "Pres" followed by the fields below, all little endian.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[brw(magic = b"Pres", little)]
pub struct PresHeader {
    /// Offset of the group descriptor table
    pub group_offset: i32,

    /// Number of group descriptors
    pub group_count: u8,

    /// Format revision of the group table
    pub group_version: u8,

    /// Header checksum, carried through unverified
    pub checksum: u16,

    /// Container format version
    pub version: i32,

    /// Offset of the first inline payload
    pub chunk_datas_offset: u32,

    /// Offset of the side loaded resource block
    pub sideload_offset: u32,

    /// Size of the side loaded resource block
    pub sideload_size: u32,
}

impl Default for PresHeader {
    fn default() -> Self {
        Self {
            group_offset: HEADER_SIZE as i32,
            group_count: Default::default(),
            group_version: Default::default(),
            checksum: Default::default(),
            version: 1,
            chunk_datas_offset: Default::default(),
            sideload_offset: Default::default(),
            sideload_size: Default::default(),
        }
    }
}

/// One entry of the group descriptor table
#[derive(
    BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize,
)]
#[brw(little)]
pub struct GroupDescriptor {
    /// Offset of the group's first TOC record
    pub entry_offset: u32,

    /// Number of consecutive TOC records in the group
    pub entry_count: u32,
}

impl GroupDescriptor {
    /// Whether the group holds no records at all
    pub const fn is_empty(&self) -> bool {
        self.entry_count == 0 || self.entry_offset == 0
    }

    /// Offset of the `index`th record of this group
    pub const fn record_offset(&self, index: u32) -> u64 {
        self.entry_offset as u64 + index as u64 * TOC_RECORD_SIZE
    }
}

/// TOC record
///
/// Describes the payload of one entry and where its names are stored
#[derive(
    BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize,
)]
#[brw(little)]
pub struct TocRecord {
    /// Packed locator, see [`crate::offset`]
    pub raw_offset: u32,

    /// Size of the payload as stored
    pub compressed_size: u32,

    /// Offset of the name pointer table inside the container
    pub name_offset: u32,

    /// Number of name pointers that are meaningful
    pub name_field_count: u32,

    /// Unused, preserved on rewrite
    pub reserved: [u8; 12],

    /// Size of the payload once decompressed
    pub decompressed_size: u32,
}

impl TocRecord {
    /// Classify the record by its fields
    pub fn kind(&self) -> EntryKind {
        let header_clear = self.raw_offset == 0
            && self.compressed_size == 0
            && self.name_offset == 0
            && self.name_field_count == 0;
        match (header_clear, self.decompressed_size) {
            (true, 0) => EntryKind::Empty,
            (true, _) => EntryKind::Dummy,
            _ => EntryKind::Live,
        }
    }

    /// Decoded locator of the payload
    pub fn locator(&self) -> Locator {
        Locator::from_raw(self.raw_offset)
    }
}

/// Classification of a TOC record
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// All fields zero, no entry at all
    Empty,
    /// Only a decompressed size, no payload or names
    Dummy,
    /// A regular entry
    Live,
}

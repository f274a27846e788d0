//! Decoding and encoding of the packed 32 bit offset field of a TOC record.
//!
//! The top 4 bits of the field select where the payload lives, the low 28 bits hold its
//! position. For external blobs the position counts 0x800 byte sectors, for inline data it
//! is a plain byte offset into the container.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Granularity of positions inside an external blob
pub const SECTOR_SIZE: u64 = 0x800;

/// Mask selecting the magnitude bits of a packed offset
pub const MAGNITUDE_MASK: u32 = 0x0FFF_FFFF;

/// Largest byte position that can be addressed inside a blob
pub const MAX_BLOB_OFFSET: u64 = MAGNITUDE_MASK as u64 * SECTOR_SIZE;

const MARKER_BIN: u8 = 0x0;
const MARKER_NO_SET: u8 = 0x3;
const MARKER_PACKAGE: u8 = 0x4;
const MARKER_DATA: u8 = 0x5;
const MARKER_PATCH: u8 = 0x6;
const MARKER_INLINE_PRIMARY: u8 = 0xC;
const MARKER_INLINE_SECONDARY: u8 = 0xD;

/// Split a raw offset field into its marker nibble and 28 bit magnitude
pub const fn decode(raw: u32) -> (u8, u32) {
    ((raw >> 28) as u8, raw & MAGNITUDE_MASK)
}

/// Pack a marker nibble and magnitude back into a raw offset field
pub fn encode(marker: u8, magnitude: u32) -> Result<u32> {
    if marker > 0xF {
        return Err(Error::CustomError(format!(
            "storage marker {marker:#x} does not fit in 4 bits"
        )));
    }
    if magnitude > MAGNITUDE_MASK {
        return Err(Error::OffsetOverflow(magnitude as u64));
    }
    Ok(((marker as u32) << 28) | magnitude)
}

/// One of the three external blob files a container may point into
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    /// `package.rdp`
    Package,
    /// `data.rdp`
    Data,
    /// `patch.rdp`
    Patch,
}

impl BlobKind {
    /// Every blob kind, in marker order
    pub const ALL: [BlobKind; 3] = [BlobKind::Package, BlobKind::Data, BlobKind::Patch];

    /// File name the blob is stored under
    pub const fn file_name(self) -> &'static str {
        match self {
            BlobKind::Package => "package.rdp",
            BlobKind::Data => "data.rdp",
            BlobKind::Patch => "patch.rdp",
        }
    }

    /// Marker nibble that selects this blob
    pub const fn marker(self) -> u8 {
        match self {
            BlobKind::Package => MARKER_PACKAGE,
            BlobKind::Data => MARKER_DATA,
            BlobKind::Patch => MARKER_PATCH,
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            BlobKind::Package => 0,
            BlobKind::Data => 1,
            BlobKind::Patch => 2,
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// The two markers that both mean "inside the current container"
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InlineMarker {
    /// Marker `0xC`
    Primary,
    /// Marker `0xD`
    Secondary,
}

impl InlineMarker {
    const fn marker(self) -> u8 {
        match self {
            InlineMarker::Primary => MARKER_INLINE_PRIMARY,
            InlineMarker::Secondary => MARKER_INLINE_SECONDARY,
        }
    }
}

/// Where an entry's payload is stored
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// Marker `0x0`, data lives outside of any known container or blob
    BinExternal { magnitude: u32 },
    /// Marker `0x3`, the payload is a separate file referenced by the entry's names
    NoSet { magnitude: u32 },
    /// Markers `0x4`..`0x6`, `sector` counts [`SECTOR_SIZE`] units into the blob
    Blob { blob: BlobKind, sector: u32 },
    /// Markers `0xC` and `0xD`, `offset` is a byte offset into the container
    Inline { marker: InlineMarker, offset: u32 },
    /// Any other marker
    Unknown { marker: u8, magnitude: u32 },
}

impl Locator {
    /// Classify a raw offset field
    pub fn from_raw(raw: u32) -> Self {
        let (marker, magnitude) = decode(raw);
        match marker {
            MARKER_BIN => Locator::BinExternal { magnitude },
            MARKER_NO_SET => Locator::NoSet { magnitude },
            MARKER_PACKAGE => Locator::Blob {
                blob: BlobKind::Package,
                sector: magnitude,
            },
            MARKER_DATA => Locator::Blob {
                blob: BlobKind::Data,
                sector: magnitude,
            },
            MARKER_PATCH => Locator::Blob {
                blob: BlobKind::Patch,
                sector: magnitude,
            },
            MARKER_INLINE_PRIMARY => Locator::Inline {
                marker: InlineMarker::Primary,
                offset: magnitude,
            },
            MARKER_INLINE_SECONDARY => Locator::Inline {
                marker: InlineMarker::Secondary,
                offset: magnitude,
            },
            marker => Locator::Unknown { marker, magnitude },
        }
    }

    /// Locator for a byte position inside `blob`, which has to sit on a sector boundary
    pub fn blob(blob: BlobKind, physical_offset: u64) -> Result<Self> {
        if physical_offset % SECTOR_SIZE != 0 {
            return Err(Error::UnalignedOffset(physical_offset));
        }
        let sector = physical_offset / SECTOR_SIZE;
        if sector > MAGNITUDE_MASK as u64 {
            return Err(Error::OffsetOverflow(physical_offset));
        }
        Ok(Locator::Blob {
            blob,
            sector: sector as u32,
        })
    }

    /// Locator for a byte position inside the container itself
    pub fn inline(marker: InlineMarker, physical_offset: u64) -> Result<Self> {
        if physical_offset > MAGNITUDE_MASK as u64 {
            return Err(Error::OffsetOverflow(physical_offset));
        }
        Ok(Locator::Inline {
            marker,
            offset: physical_offset as u32,
        })
    }

    /// The marker nibble of this locator
    pub const fn marker(&self) -> u8 {
        match self {
            Locator::BinExternal { .. } => MARKER_BIN,
            Locator::NoSet { .. } => MARKER_NO_SET,
            Locator::Blob { blob, .. } => blob.marker(),
            Locator::Inline { marker, .. } => marker.marker(),
            Locator::Unknown { marker, .. } => *marker,
        }
    }

    /// The 28 bit magnitude of this locator
    pub const fn magnitude(&self) -> u32 {
        match self {
            Locator::BinExternal { magnitude }
            | Locator::NoSet { magnitude }
            | Locator::Unknown { magnitude, .. } => *magnitude,
            Locator::Blob { sector, .. } => *sector,
            Locator::Inline { offset, .. } => *offset,
        }
    }

    /// Pack this locator back into a raw offset field
    pub fn to_raw(&self) -> Result<u32> {
        encode(self.marker(), self.magnitude())
    }

    /// Byte position of the payload inside the container or blob it lives in
    pub fn physical_offset(&self) -> Option<u64> {
        match self {
            Locator::Blob { sector, .. } => Some(*sector as u64 * SECTOR_SIZE),
            Locator::Inline { offset, .. } => Some(*offset as u64),
            _ => None,
        }
    }

    /// The blob this locator points into, if any
    pub const fn blob_kind(&self) -> Option<BlobKind> {
        match self {
            Locator::Blob { blob, .. } => Some(*blob),
            _ => None,
        }
    }

    /// Short human readable name of the storage class
    pub const fn label(&self) -> &'static str {
        match self {
            Locator::BinExternal { .. } => "bin",
            Locator::NoSet { .. } => "noset",
            Locator::Blob {
                blob: BlobKind::Package,
                ..
            } => "package",
            Locator::Blob {
                blob: BlobKind::Data,
                ..
            } => "data",
            Locator::Blob {
                blob: BlobKind::Patch,
                ..
            } => "patch",
            Locator::Inline { .. } => "inline",
            Locator::Unknown { .. } => "unknown",
        }
    }
}

/// Round `value` up to the next multiple of `align`
pub(crate) const fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

//! Types for reading PRES containers and RTBL tables
//!

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use binrw::BinRead;
use bon::Builder;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::blob::BlobSet;
use crate::compression::{unpack, CompressionMethod};
use crate::error::{EntryNotFoundError, Error, Result};
use crate::names::{NameBinding, NameRecord, NameTableReader};
use crate::offset::Locator;
use crate::rtbl;
use crate::types::{
    EntryKind, GroupDescriptor, PresHeader, TocRecord, GROUP_DESCRIPTOR_SIZE, HEADER_LEN,
    PRES_MAGIC, TOC_RECORD_SIZE,
};

/// The two table layouts that share TOC records
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// A `Pres` container with header and group table
    Pres,
    /// A headerless `.rtbl` table
    Rtbl,
}

impl ContainerKind {
    /// Recognise a container from its first bytes, or for RTBL tables from its file name
    pub fn detect(head: &[u8], path: &Path) -> Option<Self> {
        if head.starts_with(&PRES_MAGIC) {
            return Some(ContainerKind::Pres);
        }
        let is_rtbl = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("rtbl"));
        is_rtbl.then_some(ContainerKind::Rtbl)
    }
}

/// Options for how a container is parsed
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct ParseOptions {
    /// How three field name tables are interpreted
    #[builder(default)]
    pub binding: NameBinding,
}

/// One parsed TOC entry
#[derive(Debug, Clone, PartialEq)]
pub struct PresEntry {
    /// Index of the group the record belongs to
    pub group: usize,
    /// Index of the record inside its group
    pub index: usize,
    /// Offset of the record inside the container
    pub toc_offset: u64,
    pub record: TocRecord,
    pub locator: Locator,
    /// Resolved names, `None` when the record has no name table
    pub names: Option<NameRecord>,
}

impl PresEntry {
    pub fn kind(&self) -> EntryKind {
        self.record.kind()
    }

    /// Where the entry is extracted to, relative to the container's output directory.
    ///
    /// Entries without a usable name are named after their TOC offset.
    pub fn relative_path(&self) -> PathBuf {
        self.names
            .as_ref()
            .and_then(NameRecord::relative_path)
            .unwrap_or_else(|| PathBuf::from(format!("{:08X}.bin", self.toc_offset)))
    }

    /// Short name for log output
    pub fn display_name(&self) -> String {
        self.relative_path().display().to_string()
    }
}

/// The decoded payload of an entry
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The entry has no backing bytes here: a dummy, or a file stored outside any blob
    Absent,
    /// The decompressed payload and how it was stored
    Data {
        data: Vec<u8>,
        compression: CompressionMethod,
        stored_size: u64,
    },
}

#[derive(Debug, Clone)]
enum Layout {
    Pres {
        header: PresHeader,
        groups: Vec<GroupDescriptor>,
    },
    Rtbl,
}

/// PRES container reader
///
/// ```no_run
/// use std::io::prelude::*;
/// use gepack_pres::{blob::BlobSet, read::Payload};
///
/// fn list_pres_contents(reader: impl Read + Seek) -> gepack_pres::error::Result<()> {
///     let mut pres = gepack_pres::PresArchive::new(reader)?;
///     let blobs = BlobSet::<std::fs::File>::new();
///
///     for i in 0..pres.len() {
///         println!("Entry: {}", pres.by_index(i)?.display_name());
///         if let Payload::Data { data, .. } = pres.read_payload(i, &blobs)? {
///             std::io::stdout().write_all(&data)?;
///         }
///     }
///
///     Ok(())
/// }
/// ```
pub struct PresArchive<R> {
    reader: R,
    len: u64,
    layout: Layout,
    entries: Vec<PresEntry>,
}

impl<R> PresArchive<R> {
    /// Which table layout this container uses
    pub fn kind(&self) -> ContainerKind {
        match self.layout {
            Layout::Pres { .. } => ContainerKind::Pres,
            Layout::Rtbl => ContainerKind::Rtbl,
        }
    }

    /// Header of a PRES container
    pub fn header(&self) -> Option<&PresHeader> {
        match &self.layout {
            Layout::Pres { header, .. } => Some(header),
            Layout::Rtbl => None,
        }
    }

    /// Group descriptors, empty for RTBL tables
    pub fn groups(&self) -> &[GroupDescriptor] {
        match &self.layout {
            Layout::Pres { groups, .. } => groups,
            Layout::Rtbl => &[],
        }
    }

    /// Number of non empty entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the container holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the container in bytes
    pub fn container_len(&self) -> u64 {
        self.len
    }

    pub fn entries(&self) -> &[PresEntry] {
        &self.entries
    }

    /// Get an entry by index
    pub fn by_index(&self, index: usize) -> Result<&PresEntry> {
        self.entries
            .get(index)
            .ok_or(Error::EntryNotFound(EntryNotFoundError::Index(index)))
    }

    /// Get an entry by the offset of its TOC record
    pub fn by_toc_offset(&self, toc_offset: u64) -> Result<&PresEntry> {
        self.entries
            .iter()
            .find(|e| e.toc_offset == toc_offset)
            .ok_or(Error::EntryNotFound(EntryNotFoundError::TocOffset(
                toc_offset,
            )))
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> PresArchive<R> {
    /// Read a PRES container collecting the entries it contains.
    pub fn new(reader: R) -> Result<PresArchive<R>> {
        Self::open(reader, ContainerKind::Pres, ParseOptions::default())
    }

    /// Read a container of `kind`
    #[instrument(skip(reader), err)]
    pub fn open(mut reader: R, kind: ContainerKind, options: ParseOptions) -> Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        let (layout, entries) = match kind {
            ContainerKind::Pres => Self::parse_pres(&mut reader, len, options)?,
            ContainerKind::Rtbl => (Layout::Rtbl, rtbl::scan(&mut reader, len)?),
        };
        debug!("{} entries", entries.len());

        Ok(PresArchive {
            reader,
            len,
            layout,
            entries,
        })
    }

    /// Read the bytes of an entry exactly as they are stored
    #[instrument(skip(self, blobs), err)]
    pub fn read_stored<S: Read + Seek>(
        &mut self,
        index: usize,
        blobs: &BlobSet<S>,
    ) -> Result<Option<Vec<u8>>> {
        let entry = self.by_index(index)?;
        let (record, locator) = (entry.record, entry.locator);
        if entry.kind() != EntryKind::Live {
            return Ok(None);
        }

        let size = record.compressed_size as u64;
        match locator {
            Locator::Unknown { marker, .. } => Err(Error::UnknownLocator {
                marker,
                raw: record.raw_offset,
            }),
            Locator::NoSet { .. } | Locator::BinExternal { .. } => Ok(None),
            Locator::Inline { offset, .. } => {
                let offset = offset as u64;
                if offset + size > self.len {
                    return Err(Error::Truncated(format!(
                        "{size} inline bytes at {offset:#x}"
                    )));
                }
                self.reader.seek(SeekFrom::Start(offset))?;
                let mut data = vec![0; size as usize];
                self.reader.read_exact(&mut data)?;
                Ok(Some(data))
            }
            Locator::Blob { blob, sector } => blobs
                .read_at(blob, sector as u64 * crate::offset::SECTOR_SIZE, size)
                .map(Some),
        }
    }

    /// Read and decompress the payload of an entry.
    ///
    /// A payload that looks compressed but fails to decode is returned as stored.
    pub fn read_payload<S: Read + Seek>(
        &mut self,
        index: usize,
        blobs: &BlobSet<S>,
    ) -> Result<Payload> {
        let Some(stored) = self.read_stored(index, blobs)? else {
            return Ok(Payload::Absent);
        };

        let (data, compression) = unpack(&stored);
        let entry = &self.entries[index];
        if compression != CompressionMethod::None
            && data.len() as u64 != entry.record.decompressed_size as u64
        {
            warn!(
                "{} decompressed to {} bytes, record declares {}",
                entry.display_name(),
                data.len(),
                entry.record.decompressed_size
            );
        }

        Ok(Payload::Data {
            data: data.into_owned(),
            compression,
            stored_size: stored.len() as u64,
        })
    }

    fn parse_pres(
        reader: &mut R,
        len: u64,
        options: ParseOptions,
    ) -> Result<(Layout, Vec<PresEntry>)> {
        let mut magic = [0u8; 4];
        reader.seek(SeekFrom::Start(0))?;
        if len < PRES_MAGIC.len() as u64 {
            return Err(Error::InvalidContainer);
        }
        reader.read_exact(&mut magic)?;
        if magic != PRES_MAGIC {
            return Err(Error::InvalidContainer);
        }
        if len < HEADER_LEN {
            return Err(Error::Truncated("the end of the container header".into()));
        }

        reader.seek(SeekFrom::Start(0))?;
        let header = PresHeader::read(reader)?;
        let groups = Self::parse_groups(reader, len, &header)?;

        let mut entries = Vec::new();
        for (g, group) in groups.iter().enumerate() {
            Self::parse_group(reader, len, g, group, options, &mut entries)?;
        }

        Ok((Layout::Pres { header, groups }, entries))
    }

    fn parse_groups(reader: &mut R, len: u64, header: &PresHeader) -> Result<Vec<GroupDescriptor>> {
        if header.group_count == 0 || header.group_offset <= 0 {
            return Ok(Vec::new());
        }
        let start = header.group_offset as u64;
        let end = start + header.group_count as u64 * GROUP_DESCRIPTOR_SIZE;
        if end > len {
            return Err(Error::Truncated(format!(
                "the end of the group table at {start:#x}"
            )));
        }

        reader.seek(SeekFrom::Start(start))?;
        (0..header.group_count)
            .map(|_| GroupDescriptor::read(reader).map_err(Error::from))
            .collect()
    }

    fn parse_group(
        reader: &mut R,
        len: u64,
        g: usize,
        group: &GroupDescriptor,
        options: ParseOptions,
        entries: &mut Vec<PresEntry>,
    ) -> Result<()> {
        if group.is_empty() {
            return Ok(());
        }
        if group.entry_offset as u64 >= len {
            warn!("group {g} starts past the end of the container");
            return Ok(());
        }

        for index in 0..group.entry_count {
            let toc_offset = group.record_offset(index);
            if toc_offset + TOC_RECORD_SIZE > len {
                warn!(
                    "group {g} is truncated after {index} of {} records",
                    group.entry_count
                );
                break;
            }

            reader.seek(SeekFrom::Start(toc_offset))?;
            let record = TocRecord::read(reader)?;
            let kind = record.kind();
            if kind == EntryKind::Empty {
                continue;
            }

            let names = if kind == EntryKind::Live
                && record.name_offset > 0
                && record.name_field_count > 0
            {
                Some(
                    NameTableReader::new(reader, len, options.binding)
                        .read(record.name_offset, record.name_field_count)?,
                )
            } else {
                None
            };

            entries.push(PresEntry {
                group: g,
                index: index as usize,
                toc_offset,
                record,
                locator: record.locator(),
                names,
            });
        }
        Ok(())
    }
}

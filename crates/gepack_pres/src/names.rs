//! Reading of the name pointer tables referenced by TOC records.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace, warn};

use crate::error::Result;

/// Maximum number of pointers a name table can hold
pub const MAX_NAME_FIELDS: u32 = 5;

/// Prefix marking a name field as the path of a separately stored file
pub const REFERENCE_PREFIX: &str = "PATH=";

/// How a name table with three fields binds its third pointer
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameBinding {
    /// The third pointer is the entry's path
    #[default]
    Path,
    /// The third pointer is the entry's sub path
    SubPath,
}

/// The resolved strings of a name table. Absent pointers resolve to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub path: Option<String>,
    pub sub_path: Option<String>,
    pub extra_path: Option<String>,
}

impl NameRecord {
    /// A record holding only `name`
    pub fn new(name: impl Into<String>) -> Self {
        NameRecord {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_sub_path(mut self, sub_path: impl Into<String>) -> Self {
        self.sub_path = Some(sub_path.into());
        self
    }

    pub fn with_extra_path(mut self, extra_path: impl Into<String>) -> Self {
        self.extra_path = Some(extra_path.into());
        self
    }

    /// Name plus type extension, if the entry has a name
    pub fn file_name(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        Some(match self.file_type.as_deref() {
            Some(file_type) => format!("{name}.{file_type}"),
            None => name.to_owned(),
        })
    }

    /// Relative location of the entry, built from its sub path or path and its file name.
    ///
    /// Only plain path components survive, so the result never escapes the directory it is
    /// joined onto.
    pub fn relative_path(&self) -> Option<PathBuf> {
        let file_name = self.file_name()?;
        let directory = self.sub_path.as_deref().or(self.path.as_deref());

        let mut path = match directory {
            Some(directory) => sanitize(directory),
            None => PathBuf::new(),
        };
        if path.file_name().and_then(|n| n.to_str()) != Some(file_name.as_str()) {
            path.push(sanitize(&file_name));
        }
        if path.as_os_str().is_empty() {
            return None;
        }
        Some(path)
    }

    /// The file an externally stored entry points at.
    ///
    /// A field carrying the [`REFERENCE_PREFIX`] wins, otherwise the entry's relative path is
    /// used.
    pub fn reference(&self) -> Option<PathBuf> {
        let fields = [
            &self.name,
            &self.file_type,
            &self.path,
            &self.sub_path,
            &self.extra_path,
        ];
        fields
            .into_iter()
            .flatten()
            .find_map(|field| field.strip_prefix(REFERENCE_PREFIX))
            .map(sanitize)
            .or_else(|| self.relative_path())
    }

    /// Number of pointers a table holding these fields needs
    pub fn field_count(&self) -> u32 {
        if self.extra_path.is_some() {
            5
        } else if self.sub_path.is_some() {
            4
        } else if self.file_type.is_some() || self.path.is_some() {
            3
        } else {
            1
        }
    }

    /// Fields paired with the pointer slot they are read from for a table of `field_count`
    pub(crate) fn bound_fields(
        &self,
        field_count: u32,
        binding: NameBinding,
    ) -> Vec<(usize, Option<&str>)> {
        let name = (0, self.name.as_deref());
        let file_type = (1, self.file_type.as_deref());
        match field_count {
            3 => {
                let third = match binding {
                    NameBinding::Path => self.path.as_deref(),
                    NameBinding::SubPath => self.sub_path.as_deref(),
                };
                vec![name, file_type, (2, third)]
            }
            4 => vec![name, file_type, (3, self.sub_path.as_deref())],
            5 => vec![
                name,
                file_type,
                (3, self.sub_path.as_deref()),
                (4, self.extra_path.as_deref()),
            ],
            _ => vec![name],
        }
    }
}

/// Keep only the plain components of a stored path
pub(crate) fn sanitize(raw: &str) -> PathBuf {
    let normalized = raw.replace('\\', "/");
    Path::new(&normalized)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Reader for name tables
///
/// Every read restores the position of the underlying reader, so it can be used while the
/// caller is in the middle of walking a TOC block.
pub struct NameTableReader<'a, R> {
    reader: &'a mut R,
    len: u64,
    binding: NameBinding,
}

impl<'a, R: Read + Seek> NameTableReader<'a, R> {
    /// Wrap `reader`, whose total length is `len`
    pub fn new(reader: &'a mut R, len: u64, binding: NameBinding) -> Self {
        NameTableReader {
            reader,
            len,
            binding,
        }
    }

    /// Resolve the table at `name_offset` holding `field_count` pointers
    #[instrument(skip(self), err)]
    pub fn read(&mut self, name_offset: u32, field_count: u32) -> Result<NameRecord> {
        let saved = self.reader.stream_position()?;
        let record = self.read_table(name_offset, field_count);
        self.reader.seek(SeekFrom::Start(saved))?;
        record
    }

    /// Read the null terminated string at `offset`, `None` when the offset is unusable
    pub fn read_string(&mut self, offset: u32) -> Result<Option<String>> {
        if offset == 0 || offset as u64 >= self.len {
            return Ok(None);
        }

        let saved = self.reader.stream_position()?;
        self.reader.seek(SeekFrom::Start(offset as u64))?;
        let mut raw = Vec::new();
        loop {
            match self.reader.read_u8() {
                Ok(0) => break,
                Ok(byte) => raw.push(byte),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }
        self.reader.seek(SeekFrom::Start(saved))?;

        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(match String::from_utf8(raw) {
            Ok(s) => s,
            Err(e) => {
                warn!("name at {offset:#x} is not valid utf-8");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        }))
    }

    /// Raw pointers of the table at `name_offset`, unread slots are zero
    pub fn pointers(&mut self, name_offset: u32, field_count: u32) -> Result<[u32; 5]> {
        let saved = self.reader.stream_position()?;
        let pointers = self.read_pointers(name_offset, field_count);
        self.reader.seek(SeekFrom::Start(saved))?;
        pointers
    }

    fn read_pointers(&mut self, name_offset: u32, field_count: u32) -> Result<[u32; 5]> {
        let mut pointers = [0u32; MAX_NAME_FIELDS as usize];
        self.reader.seek(SeekFrom::Start(name_offset as u64))?;
        let wanted = field_count.min(MAX_NAME_FIELDS) as usize;
        for (i, pointer) in pointers.iter_mut().take(wanted).enumerate() {
            match self.reader.read_u32::<LittleEndian>() {
                Ok(value) => *pointer = value,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!("name table at {name_offset:#x} ends after {i} pointers");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        trace!(?pointers, "name pointers");
        Ok(pointers)
    }

    fn read_table(&mut self, name_offset: u32, field_count: u32) -> Result<NameRecord> {
        if name_offset as u64 >= self.len {
            warn!("name table at {name_offset:#x} lies outside the container");
            return Ok(NameRecord::default());
        }

        let pointers = self.read_pointers(name_offset, field_count)?;
        let mut record = NameRecord {
            name: self.read_string(pointers[0])?,
            ..Default::default()
        };
        match field_count {
            1 => {}
            3 => {
                record.file_type = self.read_string(pointers[1])?;
                let third = self.read_path(pointers[2])?;
                match self.binding {
                    NameBinding::Path => record.path = third,
                    NameBinding::SubPath => record.sub_path = third,
                }
            }
            4 => {
                record.file_type = self.read_string(pointers[1])?;
                record.sub_path = self.read_path(pointers[3])?;
            }
            5 => {
                record.file_type = self.read_string(pointers[1])?;
                record.sub_path = self.read_path(pointers[3])?;
                record.extra_path = self.read_path(pointers[4])?;
            }
            other => warn!("unsupported name field count {other}, only the name is kept"),
        }

        if record.name.is_none() {
            warn!("name table at {name_offset:#x} has no usable name");
        }
        Ok(record)
    }

    fn read_path(&mut self, pointer: u32) -> Result<Option<String>> {
        if !self.is_path_pointer(pointer)? {
            return Ok(None);
        }
        self.read_string(pointer)
    }

    fn is_path_pointer(&mut self, pointer: u32) -> Result<bool> {
        if pointer == 0 || pointer as u64 >= self.len {
            return Ok(false);
        }
        let saved = self.reader.stream_position()?;
        self.reader.seek(SeekFrom::Start(pointer as u64))?;
        let first = self.reader.read_u8();
        self.reader.seek(SeekFrom::Start(saved))?;
        Ok(matches!(first, Ok(b) if b != 0))
    }
}

//! The JSON record written next to every extracted container.
//!
//! A manifest snapshots each TOC record as it was on disk, together with where its payload
//! was written and how it was stored. Repacking is driven entirely by it, so nothing has to
//! be derived again from a container that may already have been modified.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::compression::CompressionMethod;
use crate::error::Result;
use crate::names::{NameBinding, NameRecord};
use crate::offset::Locator;
use crate::read::{ContainerKind, PresEntry};
use crate::types::{EntryKind, GroupDescriptor, PresHeader, TocRecord};

/// Version written into new manifests
pub const MANIFEST_VERSION: u32 = 1;

/// Extraction record of one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionManifest {
    pub version: u32,
    /// The container that was extracted, relative to the manifest when possible
    pub container: PathBuf,
    pub kind: ContainerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<PresHeader>,
    #[serde(default)]
    pub groups: Vec<GroupDescriptor>,
    #[serde(default)]
    pub binding: NameBinding,
    /// Entries keyed by the offset of their TOC record, in TOC order
    pub entries: IndexMap<u64, ManifestEntry>,
}

impl ExtractionManifest {
    pub fn new(container: PathBuf, kind: ContainerKind, binding: NameBinding) -> Self {
        ExtractionManifest {
            version: MANIFEST_VERSION,
            container,
            kind,
            header: None,
            groups: Vec::new(),
            binding,
            entries: IndexMap::new(),
        }
    }

    /// Read a manifest from `path`
    #[instrument(err)]
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Write the manifest to `path` as pretty printed JSON
    #[instrument(skip(self), err)]
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        debug!("{} entries written", self.entries.len());
        Ok(())
    }

    /// Resolve a path stored in the manifest at `manifest_path`
    pub fn resolve(manifest_path: &Path, stored: &Path) -> PathBuf {
        match manifest_path.parent() {
            Some(dir) if stored.is_relative() => dir.join(stored),
            _ => stored.to_path_buf(),
        }
    }

    /// Absolute location of the container this manifest describes
    pub fn container_path(&self, manifest_path: &Path) -> PathBuf {
        Self::resolve(manifest_path, &self.container)
    }

    /// Manifests of nested containers, paired with the TOC offset of the entry holding them
    pub fn nested<'a>(
        &'a self,
        manifest_path: &'a Path,
    ) -> impl Iterator<Item = (u64, PathBuf)> + 'a {
        self.entries.iter().filter_map(move |(offset, entry)| {
            let nested = entry.nested.as_deref()?;
            Some((*offset, Self::resolve(manifest_path, nested)))
        })
    }

    /// Count entries by status label
    pub fn status_counts(&self) -> IndexMap<&'static str, usize> {
        let mut counts = IndexMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.status.label()).or_insert(0) += 1;
        }
        counts
    }
}

/// Make `path` relative to `base` when it lies below it
pub fn relative_to(base: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Which TOC fields a repack may replace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFlags {
    pub offset: bool,
    pub compressed_size: bool,
    pub name_offset: bool,
    pub name_field_count: bool,
    pub decompressed_size: bool,
}

impl UpdateFlags {
    /// Flags extraction records for an entry of `kind`.
    ///
    /// Payload fields of live entries may change, names stay put unless a user opts in.
    pub fn for_kind(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Live => UpdateFlags {
                offset: true,
                compressed_size: true,
                decompressed_size: true,
                ..Default::default()
            },
            EntryKind::Dummy | EntryKind::Empty => UpdateFlags::default(),
        }
    }

    /// Whether the name table may be rewritten
    pub fn names(&self) -> bool {
        self.name_offset || self.name_field_count
    }
}

/// What extraction did with an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryStatus {
    /// The payload was written to the entry's file
    Extracted,
    /// A placeholder with nothing to extract
    Dummy,
    /// The payload is the separately stored file at `path`
    Reference { path: PathBuf },
    /// More than one file matched the entry's reference
    Ambiguous { candidates: Vec<PathBuf> },
    /// Nothing could be extracted
    Unresolved { reason: String },
}

impl EntryStatus {
    pub fn unresolved(reason: impl ToString) -> Self {
        EntryStatus::Unresolved {
            reason: reason.to_string(),
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            EntryStatus::Extracted => "extracted",
            EntryStatus::Dummy => "dummy",
            EntryStatus::Reference { .. } => "reference",
            EntryStatus::Ambiguous { .. } => "ambiguous",
            EntryStatus::Unresolved { .. } => "unresolved",
        }
    }
}

/// Extraction record of one TOC entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub group: usize,
    pub index: usize,
    pub kind: EntryKind,
    /// The record as it was on disk
    pub record: TocRecord,
    pub locator: Locator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<NameRecord>,
    /// Extracted payload, relative to the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub compression: CompressionMethod,
    /// Hex MD5 of the payload as extracted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub update: UpdateFlags,
    pub status: EntryStatus,
    /// Manifest of the container stored in this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<PathBuf>,
}

impl ManifestEntry {
    /// Snapshot of a parsed entry with nothing extracted yet
    pub fn new(entry: &PresEntry, status: EntryStatus) -> Self {
        ManifestEntry {
            group: entry.group,
            index: entry.index,
            kind: entry.kind(),
            record: entry.record,
            locator: entry.locator,
            names: entry.names.clone(),
            file: None,
            compression: CompressionMethod::None,
            digest: None,
            update: UpdateFlags::for_kind(entry.kind()),
            status,
            nested: None,
        }
    }
}

/// Hex encoded MD5 of `data`, as stored in [`ManifestEntry::digest`]
pub fn digest(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

//! Repacking of extracted containers.
//!
//! A [`RepackSession`] first registers every container that takes part, claiming the blob
//! ranges their entries occupy, and only then rewrites payloads. Relocated payloads can
//! therefore never land on bytes another registered entry still points at.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use binrw::BinRead;
use bon::Builder;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::alloc::{EntryId, OriginalSlot, PlacementKind, PlacementPolicy};
use crate::blob::BlobSet;
use crate::cancel::CancellationToken;
use crate::compression::compress;
use crate::error::{Error, Result};
use crate::manifest::{self, ExtractionManifest, ManifestEntry};
use crate::names::{NameBinding, NameTableReader};
use crate::offset::{Locator, SECTOR_SIZE};
use crate::read::ContainerKind;
use crate::types::{EntryKind, TocRecord};
use crate::write::{inline_slot, ContainerWriter};

/// Options of a repack session
#[derive(Debug, Clone, Default, Builder)]
pub struct RepackOptions {
    /// Where relocated blob payloads are placed
    #[builder(default)]
    pub policy: PlacementPolicy,

    /// Rewrite payloads even when their digest matches the extracted one
    #[builder(default)]
    pub force: bool,

    pub cancel: Option<CancellationToken>,
}

/// Supplies the replacement payload of an entry
pub trait PayloadSource {
    /// Decompressed replacement for the entry at `toc_offset`, `None` to keep the stored one
    fn payload(&self, toc_offset: u64, entry: &ManifestEntry) -> Result<Option<Vec<u8>>>;
}

impl PayloadSource for HashMap<u64, Vec<u8>> {
    fn payload(&self, toc_offset: u64, _entry: &ManifestEntry) -> Result<Option<Vec<u8>>> {
        Ok(self.get(&toc_offset).cloned())
    }
}

/// Payloads read from the files an extraction wrote
#[derive(Debug, Clone)]
pub struct DirectoryPayloads {
    manifest_path: PathBuf,
    overrides: HashMap<u64, Vec<u8>>,
}

impl DirectoryPayloads {
    /// Payloads of the manifest at `manifest_path`
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        DirectoryPayloads {
            manifest_path: manifest_path.into(),
            overrides: HashMap::new(),
        }
    }

    /// Use `data` for the entry at `toc_offset` instead of its file
    pub fn with_override(mut self, toc_offset: u64, data: Vec<u8>) -> Self {
        self.overrides.insert(toc_offset, data);
        self
    }
}

impl PayloadSource for DirectoryPayloads {
    fn payload(&self, toc_offset: u64, entry: &ManifestEntry) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.overrides.get(&toc_offset) {
            return Ok(Some(data.clone()));
        }
        let Some(file) = &entry.file else {
            return Ok(None);
        };
        let path = ExtractionManifest::resolve(&self.manifest_path, file);
        if !path.is_file() {
            warn!("{} is missing, keeping the stored payload", path.display());
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }
}

/// Summary of a repack
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepackReport {
    /// Entries with a rewritten payload, record or name
    pub rewritten: usize,
    /// Entries left as they were
    pub unchanged: usize,
    /// Blob payloads that reused identical content
    pub deduplicated: usize,
    /// Blob payloads that moved away from their original offset
    pub relocated: usize,
    /// Entries that could not be repacked, by TOC offset
    pub failed: Vec<(u64, String)>,
}

impl RepackReport {
    fn merge(&mut self, other: RepackReport) {
        self.rewritten += other.rewritten;
        self.unchanged += other.unchanged;
        self.deduplicated += other.deduplicated;
        self.relocated += other.relocated;
        self.failed.extend(other.failed);
    }
}

/// A repacked container
#[derive(Debug, Clone)]
pub struct RepackOutcome {
    pub data: Vec<u8>,
    pub report: RepackReport,
}

/// A repack over a set of containers sharing one [`BlobSet`]
pub struct RepackSession<'a, S> {
    blobs: &'a BlobSet<S>,
    options: RepackOptions,
    containers: u32,
}

impl<'a, S: Read + Write + Seek> RepackSession<'a, S> {
    pub fn new(blobs: &'a BlobSet<S>, options: RepackOptions) -> Self {
        RepackSession {
            blobs,
            options,
            containers: 0,
        }
    }

    /// Claim the blob ranges used by the entries of `manifest`, returning its session id.
    ///
    /// Every container has to be registered before the first call to
    /// [`RepackSession::repack`].
    #[instrument(skip_all, fields(container = %manifest.container.display()))]
    pub fn register(&mut self, manifest: &ExtractionManifest) -> u32 {
        let container = self.containers;
        self.containers += 1;

        for (&toc_offset, entry) in &manifest.entries {
            let (EntryKind::Live, Locator::Blob { blob, sector }) = (entry.kind, entry.locator)
            else {
                continue;
            };
            let owner = EntryId {
                container,
                toc_offset,
            };
            let start = sector as u64 * SECTOR_SIZE;
            if !self
                .blobs
                .claim(blob, owner, start, entry.record.compressed_size as u64)
            {
                debug!("{blob} is not part of the session");
            }
        }
        container
    }

    fn check_cancel(&self) -> Result<()> {
        match &self.options.cancel {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    /// Repack the container registered as `container` from its `original` bytes
    #[instrument(skip(self, original, manifest, source), err)]
    pub fn repack(
        &mut self,
        container: u32,
        original: Vec<u8>,
        manifest: &ExtractionManifest,
        source: &impl PayloadSource,
    ) -> Result<RepackOutcome> {
        let mut writer = ContainerWriter::new(original);
        let mut report = RepackReport::default();

        for (&toc_offset, entry) in &manifest.entries {
            self.check_cancel()?;
            if entry.kind != EntryKind::Live {
                report.unchanged += 1;
                continue;
            }

            let owner = EntryId {
                container,
                toc_offset,
            };
            match self.repack_entry(owner, entry, manifest, &mut writer, source, &mut report) {
                Ok(true) => report.rewritten += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) if e.is_entry_scoped() => {
                    warn!("entry at {toc_offset:#x} was not repacked: {e}");
                    report.failed.push((toc_offset, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(RepackOutcome {
            data: writer.into_inner(),
            report,
        })
    }

    fn repack_entry(
        &self,
        owner: EntryId,
        entry: &ManifestEntry,
        manifest: &ExtractionManifest,
        writer: &mut ContainerWriter,
        source: &impl PayloadSource,
        report: &mut RepackReport,
    ) -> Result<bool> {
        let toc_offset = owner.toc_offset;
        let current = {
            let mut cursor = Cursor::new(writer.as_bytes());
            cursor.set_position(toc_offset);
            TocRecord::read(&mut cursor)
                .map_err(|_| Error::Truncated(format!("the toc record at {toc_offset:#x}")))?
        };

        let mut record = current;
        if entry.update.name_offset {
            record.name_offset = entry.record.name_offset;
        }
        if entry.update.name_field_count {
            record.name_field_count = entry.record.name_field_count;
        }

        let edits = if entry.update.names() && manifest.kind == ContainerKind::Pres {
            name_edits(writer, &record, entry, manifest.binding)?
        } else {
            Vec::new()
        };

        let mut changed = false;

        if let Some(data) = source.payload(toc_offset, entry)? {
            let unchanged = entry.digest.as_deref() == Some(manifest::digest(&data).as_str());
            if unchanged && !self.options.force {
                debug!("payload at {toc_offset:#x} is unchanged");
            } else {
                let stored = compress(&data, entry.compression)?;
                let locator = self.write_payload(owner, entry, &stored, writer, report)?;
                if entry.update.offset {
                    record.raw_offset = locator.to_raw()?;
                } else if locator != entry.locator {
                    warn!("payload at {toc_offset:#x} moved but its offset is not updatable");
                }
                if entry.update.compressed_size {
                    record.compressed_size = stored.len() as u32;
                }
                if entry.update.decompressed_size {
                    record.decompressed_size = data.len() as u32;
                }
                changed = true;
            }
        }

        // Names only change once the payload is in place, a failed entry stays untouched
        for edit in &edits {
            writer.write_string(edit.pointer, edit.old_len, edit.value)?;
            changed = true;
        }
        if record != current {
            writer.write_record(toc_offset, &record)?;
            changed = true;
        }
        Ok(changed)
    }

    /// Store an encoded payload, returning where it now lives
    fn write_payload(
        &self,
        owner: EntryId,
        entry: &ManifestEntry,
        stored: &[u8],
        writer: &mut ContainerWriter,
        report: &mut RepackReport,
    ) -> Result<Locator> {
        match entry.locator {
            Locator::Inline { offset, .. } => {
                let reserved = inline_slot(entry.record.compressed_size as u64);
                writer.write_inline(offset as u64, reserved, stored)?;
                Ok(entry.locator)
            }
            Locator::Blob { blob, sector } => {
                let original = OriginalSlot::new(
                    sector as u64 * SECTOR_SIZE,
                    entry.record.compressed_size as u64,
                );
                let placement =
                    self.blobs
                        .store(blob, owner, stored, Some(original), self.options.policy)?;
                match placement.kind {
                    PlacementKind::Deduplicated => report.deduplicated += 1,
                    PlacementKind::Relocated => report.relocated += 1,
                    PlacementKind::Original => {}
                }
                Locator::blob(blob, placement.offset)
            }
            Locator::Unknown { marker, .. } => Err(Error::UnknownLocator {
                marker,
                raw: entry.record.raw_offset,
            }),
            Locator::NoSet { .. } | Locator::BinExternal { .. } => {
                debug!("entry at {:#x} has no payload to store", owner.toc_offset);
                Ok(entry.locator)
            }
        }
    }
}

/// A name string to replace in place
struct NameEdit<'e> {
    pointer: u32,
    old_len: usize,
    value: &'e str,
}

/// Collect every name string of the table `record` points at that differs from `entry`.
///
/// Nothing is written, a replacement longer than its original string fails the entry.
fn name_edits<'e>(
    writer: &ContainerWriter,
    record: &TocRecord,
    entry: &'e ManifestEntry,
    binding: NameBinding,
) -> Result<Vec<NameEdit<'e>>> {
    let Some(names) = &entry.names else {
        return Ok(Vec::new());
    };
    if record.name_offset == 0 || record.name_field_count == 0 {
        return Ok(Vec::new());
    }

    let bytes = writer.as_bytes();
    let mut cursor = Cursor::new(bytes);
    let mut reader = NameTableReader::new(&mut cursor, bytes.len() as u64, binding);
    let pointers = reader.pointers(record.name_offset, record.name_field_count)?;

    let mut edits = Vec::new();
    for (slot, value) in names.bound_fields(record.name_field_count, binding) {
        let pointer = pointers[slot];
        let old = reader.read_string(pointer)?;
        if old.as_deref() == value {
            continue;
        }
        match (old, value) {
            (None, Some(value)) => return Err(Error::NameOverflow(value.to_owned())),
            (Some(old), value) => {
                let value = value.unwrap_or_default();
                if value.len() > old.len() {
                    return Err(Error::NameOverflow(value.to_owned()));
                }
                edits.push(NameEdit {
                    pointer,
                    old_len: old.len(),
                    value,
                });
            }
            (None, None) => {}
        }
    }
    Ok(edits)
}

/// One container of a manifest tree
struct TreeNode {
    manifest_path: PathBuf,
    manifest: ExtractionManifest,
    /// Nested containers as (TOC offset in this container, node index)
    children: Vec<(u64, usize)>,
    id: u32,
}

fn load_tree(
    manifest_path: &Path,
    nodes: &mut Vec<TreeNode>,
    visited: &mut HashSet<PathBuf>,
) -> Result<usize> {
    let manifest = ExtractionManifest::load(manifest_path)?;
    let index = nodes.len();
    nodes.push(TreeNode {
        manifest_path: manifest_path.to_path_buf(),
        manifest,
        children: Vec::new(),
        id: 0,
    });

    let nested: Vec<_> = nodes[index].manifest.nested(manifest_path).collect();
    for (toc_offset, child_path) in nested {
        let canonical = fs::canonicalize(&child_path).unwrap_or(child_path.clone());
        if !visited.insert(canonical) {
            warn!("{} is nested more than once, skipping it", child_path.display());
            continue;
        }
        if !child_path.is_file() {
            warn!("nested manifest {} is missing", child_path.display());
            continue;
        }
        let child = load_tree(&child_path, nodes, visited)?;
        nodes[index].children.push((toc_offset, child));
    }
    Ok(index)
}

fn repack_node<S: Read + Write + Seek>(
    session: &mut RepackSession<'_, S>,
    nodes: &[TreeNode],
    index: usize,
    report: &mut RepackReport,
) -> Result<Vec<u8>> {
    let node = &nodes[index];
    let mut source = DirectoryPayloads::new(&node.manifest_path);
    for &(toc_offset, child) in &node.children {
        let data = repack_node(session, nodes, child, report)?;
        source = source.with_override(toc_offset, data);
    }

    let original = fs::read(node.manifest.container_path(&node.manifest_path))?;
    let outcome = session.repack(node.id, original, &node.manifest, &source)?;
    report.merge(outcome.report);
    Ok(outcome.data)
}

/// Repack the manifest at `manifest_path` and every nested manifest below it, writing the
/// root container to `output`.
///
/// Nested containers are repacked first and become the payloads of the entries holding
/// them. The output is only replaced once every container was repacked.
#[instrument(skip(blobs, options), err)]
pub fn repack_tree<S: Read + Write + Seek>(
    manifest_path: &Path,
    output: &Path,
    blobs: &BlobSet<S>,
    options: RepackOptions,
) -> Result<RepackReport> {
    let mut nodes = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(fs::canonicalize(manifest_path).unwrap_or(manifest_path.to_path_buf()));
    load_tree(manifest_path, &mut nodes, &mut visited)?;

    let mut session = RepackSession::new(blobs, options);
    for node in &mut nodes {
        node.id = session.register(&node.manifest);
    }

    let mut report = RepackReport::default();
    let data = repack_node(&mut session, &nodes, 0, &mut report)?;
    blobs.flush()?;

    let directory = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(&data)?;
    file.persist(output).map_err(|e| Error::IOError(e.error))?;

    info!(
        "{} rewritten, {} unchanged, {} failed",
        report.rewritten,
        report.unchanged,
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::blob::BlobSet;
    use crate::builder::{BuilderEntry, PresBuilder};
    use crate::compression::{decompress, CompressionMethod};
    use crate::error::Result;
    use crate::manifest::{digest, EntryStatus, ExtractionManifest, ManifestEntry};
    use crate::names::{NameBinding, NameRecord};
    use crate::offset::{BlobKind, Locator};
    use crate::read::{ContainerKind, Payload, PresArchive};
    use crate::repack::{RepackOptions, RepackSession};

    fn manifest_of(data: &[u8], payloads: &HashMap<u64, Vec<u8>>) -> Result<ExtractionManifest> {
        let archive = PresArchive::new(Cursor::new(data))?;
        let mut manifest = ExtractionManifest::new(
            PathBuf::from("test.res"),
            ContainerKind::Pres,
            NameBinding::Path,
        );
        for entry in archive.entries() {
            let mut record = ManifestEntry::new(entry, EntryStatus::Extracted);
            if let Some(data) = payloads.get(&entry.toc_offset) {
                record.digest = Some(digest(data));
            }
            manifest.entries.insert(entry.toc_offset, record);
        }
        Ok(manifest)
    }

    #[test]
    fn inline_payload_is_replaced_in_its_slot() -> Result<()> {
        let mut builder = PresBuilder::new();
        let group = builder.add_group();
        builder
            .push(group, BuilderEntry::inline(NameRecord::new("a"), *b"0123456789"))
            .push(group, BuilderEntry::inline(NameRecord::new("b"), *b"keep"));
        let original = builder.build()?;

        let mut manifest = manifest_of(&original, &HashMap::new())?;
        let (&first, _) = manifest.entries.first().unwrap();
        manifest.entries[0].digest = Some(digest(b"0123456789"));

        let blobs = BlobSet::<Cursor<Vec<u8>>>::new();
        let mut session = RepackSession::new(&blobs, RepackOptions::default());
        let id = session.register(&manifest);
        let payloads = HashMap::from([(first, b"abcdef".to_vec())]);
        let outcome = session.repack(id, original.clone(), &manifest, &payloads)?;

        assert_eq!(outcome.report.rewritten, 1);
        assert_eq!(outcome.report.unchanged, 1);
        assert_eq!(outcome.data.len(), original.len());

        let mut archive = PresArchive::new(Cursor::new(outcome.data))?;
        assert_eq!(archive.by_index(0)?.record.compressed_size, 6);
        assert_eq!(archive.by_index(0)?.record.decompressed_size, 6);
        assert_eq!(
            archive.read_payload(0, &blobs)?,
            Payload::Data {
                data: b"abcdef".to_vec(),
                compression: CompressionMethod::None,
                stored_size: 6,
            }
        );
        assert!(matches!(
            archive.read_payload(1, &blobs)?,
            Payload::Data { data, .. } if data == b"keep"
        ));
        Ok(())
    }

    #[traced_test]
    #[test]
    fn oversized_inline_payload_fails_only_its_entry() -> Result<()> {
        let mut builder = PresBuilder::new();
        let group = builder.add_group();
        builder.push(group, BuilderEntry::inline(NameRecord::new("a"), *b"tiny"));
        let original = builder.build()?;

        let manifest = manifest_of(&original, &HashMap::new())?;
        let (&first, _) = manifest.entries.first().unwrap();

        let blobs = BlobSet::<Cursor<Vec<u8>>>::new();
        let mut session = RepackSession::new(&blobs, RepackOptions::default());
        let id = session.register(&manifest);
        let payloads = HashMap::from([(first, vec![7u8; 64])]);
        let outcome = session.repack(id, original.clone(), &manifest, &payloads)?;

        assert_eq!(outcome.report.failed.len(), 1);
        assert_eq!(outcome.data, original);
        assert!(logs_contain("was not repacked"));
        Ok(())
    }

    #[test]
    fn compressed_inline_payload_is_recompressed() -> Result<()> {
        let payload = vec![b'z'; 4000];
        let mut builder = PresBuilder::new();
        let group = builder.add_group();
        builder.push(
            group,
            BuilderEntry::compressed(NameRecord::new("a"), payload, CompressionMethod::Blz2),
        );
        let original = builder.build()?;

        let mut manifest = manifest_of(&original, &HashMap::new())?;
        manifest.entries[0].compression = CompressionMethod::Blz2;
        let (&first, _) = manifest.entries.first().unwrap();

        let blobs = BlobSet::<Cursor<Vec<u8>>>::new();
        let mut session = RepackSession::new(&blobs, RepackOptions::default());
        let id = session.register(&manifest);
        let payloads = HashMap::from([(first, vec![b'y'; 4000])]);
        let outcome = session.repack(id, original, &manifest, &payloads)?;
        assert_eq!(outcome.report.rewritten, 1);

        let mut archive = PresArchive::new(Cursor::new(outcome.data))?;
        let Some(stored) = archive.read_stored(0, &blobs)? else {
            panic!("entry has no stored payload");
        };
        assert_eq!(&stored[..4], b"blz2");
        assert_eq!(decompress(&stored), Some(vec![b'y'; 4000]));
        Ok(())
    }

    #[test]
    fn blob_payloads_share_identical_content() -> Result<()> {
        let mut builder = PresBuilder::new();
        let group = builder.add_group();
        builder
            .push(
                group,
                BuilderEntry::external(
                    NameRecord::new("a"),
                    Locator::blob(BlobKind::Data, 0x800)?,
                    4,
                    4,
                ),
            )
            .push(
                group,
                BuilderEntry::external(
                    NameRecord::new("b"),
                    Locator::blob(BlobKind::Data, 0x1000)?,
                    4,
                    4,
                ),
            );
        let original = builder.build()?;
        let manifest = manifest_of(&original, &HashMap::new())?;
        let offsets: Vec<u64> = manifest.entries.keys().copied().collect();

        let blobs = BlobSet::new().with_blob(BlobKind::Data, Cursor::new(vec![0u8; 0x1800]))?;
        let mut session = RepackSession::new(&blobs, RepackOptions::default());
        let id = session.register(&manifest);
        let shared = vec![0x5Au8; 0x900];
        let payloads = HashMap::from([(offsets[0], shared.clone()), (offsets[1], shared)]);
        let outcome = session.repack(id, original, &manifest, &payloads)?;

        assert_eq!(outcome.report.relocated, 1);
        assert_eq!(outcome.report.deduplicated, 1);

        let archive = PresArchive::new(Cursor::new(outcome.data))?;
        let first = archive.by_index(0)?.locator;
        let second = archive.by_index(1)?.locator;
        assert_eq!(first, second);
        assert_eq!(archive.by_index(1)?.record.compressed_size, 0x900);
        Ok(())
    }

    #[test]
    fn dummy_is_preserved() -> Result<()> {
        let mut builder = PresBuilder::new();
        let group = builder.add_group();
        builder.push(group, BuilderEntry::Dummy { decompressed_size: 64 });
        let original = builder.build()?;
        let manifest = manifest_of(&original, &HashMap::new())?;

        let blobs = BlobSet::<Cursor<Vec<u8>>>::new();
        let mut session = RepackSession::new(&blobs, RepackOptions::default());
        let id = session.register(&manifest);
        let payloads = HashMap::from([(0x30, b"ignored".to_vec())]);
        let outcome = session.repack(id, original.clone(), &manifest, &payloads)?;

        assert_eq!(outcome.data, original);
        assert_eq!(outcome.report.rewritten, 0);
        let archive = PresArchive::new(Cursor::new(outcome.data))?;
        assert_eq!(archive.by_index(0)?.record.decompressed_size, 64);
        Ok(())
    }

    #[test]
    fn names_are_rewritten_when_updatable() -> Result<()> {
        let mut builder = PresBuilder::new();
        let group = builder.add_group();
        builder.push(
            group,
            BuilderEntry::inline(NameRecord::new("model").with_type("mdl"), *b"data"),
        );
        let original = builder.build()?;
        let mut manifest = manifest_of(&original, &HashMap::new())?;

        let entry = &mut manifest.entries[0];
        entry.names = Some(NameRecord::new("mdl2").with_type("mdl"));
        entry.update.name_offset = true;

        let blobs = BlobSet::<Cursor<Vec<u8>>>::new();
        let mut session = RepackSession::new(&blobs, RepackOptions::default());
        let id = session.register(&manifest);
        let outcome = session.repack(id, original, &manifest, &HashMap::new())?;
        assert_eq!(outcome.report.rewritten, 1);

        let archive = PresArchive::new(Cursor::new(outcome.data.clone()))?;
        let names = archive.by_index(0)?.names.clone().unwrap_or_default();
        assert_eq!(names.name.as_deref(), Some("mdl2"));
        assert_eq!(names.file_type.as_deref(), Some("mdl"));

        manifest.entries[0].names = Some(NameRecord::new("much_longer_name").with_type("mdl"));
        let mut session = RepackSession::new(&blobs, RepackOptions::default());
        let id = session.register(&manifest);
        let outcome = session.repack(id, outcome.data, &manifest, &HashMap::new())?;
        assert_eq!(outcome.report.failed.len(), 1);
        Ok(())
    }

    #[traced_test]
    #[test]
    fn failed_payload_keeps_names() -> Result<()> {
        let mut builder = PresBuilder::new();
        let group = builder.add_group();
        builder.push(
            group,
            BuilderEntry::inline(NameRecord::new("model").with_type("mdl"), *b"tiny"),
        );
        let original = builder.build()?;
        let mut manifest = manifest_of(&original, &HashMap::new())?;

        let entry = &mut manifest.entries[0];
        entry.names = Some(NameRecord::new("mdl2").with_type("mdl"));
        entry.update.name_offset = true;
        let (&first, _) = manifest.entries.first().unwrap();

        let blobs = BlobSet::<Cursor<Vec<u8>>>::new();
        let mut session = RepackSession::new(&blobs, RepackOptions::default());
        let id = session.register(&manifest);
        let payloads = HashMap::from([(first, vec![7u8; 64])]);
        let outcome = session.repack(id, original.clone(), &manifest, &payloads)?;

        assert_eq!(outcome.report.failed.len(), 1);
        assert_eq!(outcome.report.rewritten, 0);
        assert!(outcome.data == original);

        let archive = PresArchive::new(Cursor::new(outcome.data))?;
        let names = archive.by_index(0)?.names.clone().unwrap_or_default();
        assert_eq!(names.name.as_deref(), Some("model"));
        assert!(logs_contain("does not fit"));
        Ok(())
    }
}

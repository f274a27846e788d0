//! Recursive extraction of a container tree to disk.
//!
//! Containers are processed from a worklist. Every extracted payload or referenced file
//! that is itself a container is queued again, and a set of processed canonical paths keeps
//! self referencing trees from being visited twice.

use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use bon::Builder;
use tracing::{debug, info, instrument, warn};

use crate::blob::BlobSet;
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::manifest::{self, relative_to, EntryStatus, ExtractionManifest, ManifestEntry};
use crate::names::{NameBinding, NameRecord};
use crate::offset::Locator;
use crate::read::{ContainerKind, ParseOptions, Payload, PresArchive, PresEntry};
use crate::types::EntryKind;

/// Options of an extraction session
#[derive(Debug, Clone, Builder)]
pub struct ExtractOptions {
    /// Directory the root container is extracted into, its manifest is `<output>.json`
    #[builder(into)]
    pub output: PathBuf,

    /// Extract nested and referenced containers too
    #[builder(default = true)]
    pub recursive: bool,

    /// Directories searched for files referenced by `NoSet` entries, in order.
    ///
    /// When empty the output directory of the referencing container is searched first,
    /// then the directory holding the root container.
    #[builder(default)]
    pub search_roots: Vec<PathBuf>,

    #[builder(default)]
    pub binding: NameBinding,

    /// Replace files left by an earlier extraction instead of failing
    #[builder(default)]
    pub overwrite: bool,

    pub cancel: Option<CancellationToken>,
}

/// Summary of an extraction session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractReport {
    /// Every manifest written, root first
    pub manifests: Vec<PathBuf>,
    /// Number of payloads written
    pub extracted: usize,
    /// Number of entries recorded as unresolved or ambiguous
    pub skipped: usize,
    /// Nested containers that could not be extracted, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

#[derive(Debug)]
struct PendingContainer {
    source: PathBuf,
    output: PathBuf,
    manifest: PathBuf,
    kind: ContainerKind,
    depth: usize,
}

/// Manifest path belonging to an output directory or extracted file
pub fn manifest_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".json");
    PathBuf::from(name)
}

/// `dir`, or `<dir>_extracted` when a file already takes its place
fn extraction_dir(dir: PathBuf) -> PathBuf {
    if !dir.is_file() {
        return dir;
    }
    let mut name = OsString::from(dir.as_os_str());
    name.push("_extracted");
    PathBuf::from(name)
}

/// Read the first bytes of `path` to tell whether it holds a container
pub fn sniff(path: &Path) -> Result<Option<ContainerKind>> {
    let mut head = Vec::with_capacity(4);
    File::open(path)?.take(4).read_to_end(&mut head)?;
    Ok(ContainerKind::detect(&head, path))
}

/// Extract `root` with `options`, reading external payloads from `blobs`
pub fn extract<S: Read + Seek>(
    root: &Path,
    blobs: &BlobSet<S>,
    options: ExtractOptions,
) -> Result<ExtractReport> {
    Extractor::new(blobs, options).run(root)
}

/// Extraction session over one container tree
pub struct Extractor<'a, S> {
    blobs: &'a BlobSet<S>,
    options: ExtractOptions,
    queue: VecDeque<PendingContainer>,
    processed: HashSet<PathBuf>,
    root_dir: PathBuf,
    report: ExtractReport,
}

impl<'a, S: Read + Seek> Extractor<'a, S> {
    pub fn new(blobs: &'a BlobSet<S>, options: ExtractOptions) -> Self {
        Extractor {
            blobs,
            options,
            queue: VecDeque::new(),
            processed: HashSet::new(),
            root_dir: PathBuf::new(),
            report: ExtractReport::default(),
        }
    }

    /// Extract `root` and everything reachable from it.
    ///
    /// Failures of the root container are returned, failures of nested containers are
    /// logged and recorded in the report.
    #[instrument(skip(self), err)]
    pub fn run(mut self, root: &Path) -> Result<ExtractReport> {
        let kind = sniff(root)?.ok_or(Error::InvalidContainer)?;
        self.root_dir = root.parent().map(Path::to_path_buf).unwrap_or_default();

        let output = self.options.output.clone();
        self.queue.push_back(PendingContainer {
            source: root.to_path_buf(),
            manifest: manifest_path(&output),
            output,
            kind,
            depth: 0,
        });

        while let Some(pending) = self.queue.pop_front() {
            self.check_cancel()?;

            let canonical = fs::canonicalize(&pending.source).unwrap_or(pending.source.clone());
            if !self.processed.insert(canonical) {
                debug!("{} was already extracted", pending.source.display());
                continue;
            }

            match self.extract_container(&pending) {
                Ok(()) => {
                    info!(
                        "extracted {} to {}",
                        pending.source.display(),
                        pending.output.display()
                    );
                    self.report.manifests.push(pending.manifest);
                }
                Err(e) if pending.depth == 0 || matches!(e, Error::Cancelled) => return Err(e),
                Err(e) => {
                    warn!("skipping nested container {}: {e}", pending.source.display());
                    self.report.failed.push((pending.source, e.to_string()));
                }
            }
        }

        Ok(self.report)
    }

    fn check_cancel(&self) -> Result<()> {
        match &self.options.cancel {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    #[instrument(skip_all, err, fields(source = %pending.source.display()))]
    fn extract_container(&mut self, pending: &PendingContainer) -> Result<()> {
        let reader = BufReader::new(File::open(&pending.source)?);
        let parse = ParseOptions::builder()
            .binding(self.options.binding)
            .build();
        let mut archive = PresArchive::open(reader, pending.kind, parse)?;

        fs::create_dir_all(&pending.output)?;
        let manifest_dir = pending
            .manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut manifest = ExtractionManifest::new(
            relative_to(&manifest_dir, &pending.source),
            pending.kind,
            self.options.binding,
        );
        manifest.header = archive.header().copied();
        manifest.groups = archive.groups().to_vec();

        let mut used_names = HashSet::new();
        for i in 0..archive.len() {
            self.check_cancel()?;
            let entry = archive.by_index(i)?.clone();
            let mut record = ManifestEntry::new(&entry, EntryStatus::Extracted);

            match (entry.kind(), entry.locator) {
                (EntryKind::Dummy | EntryKind::Empty, _) => record.status = EntryStatus::Dummy,
                (_, Locator::NoSet { .. }) => {
                    record.status = self.resolve_reference(&entry, pending);
                    if let EntryStatus::Reference { path } = &record.status {
                        self.queue_reference(path, pending)?;
                        record.status = EntryStatus::Reference {
                            path: relative_to(&manifest_dir, path),
                        };
                    }
                }
                (_, Locator::BinExternal { .. }) => {
                    record.status =
                        EntryStatus::unresolved("payload is stored outside any container or blob");
                }
                _ => match archive.read_payload(i, self.blobs) {
                    Ok(Payload::Data {
                        data, compression, ..
                    }) => {
                        let file =
                            self.write_payload(&pending.output, &entry, &data, &mut used_names)?;
                        self.report.extracted += 1;
                        debug!("{} -> {}", entry.display_name(), file.display());

                        record.compression = compression;
                        record.digest = Some(manifest::digest(&data));
                        record.file = Some(relative_to(&manifest_dir, &file));
                        if let Some(nested) = self.queue_nested(&file, &data, pending) {
                            record.nested = Some(relative_to(&manifest_dir, &nested));
                        }
                    }
                    Ok(Payload::Absent) => {
                        record.status = EntryStatus::unresolved("entry has no payload");
                    }
                    Err(e) if e.is_entry_scoped() => {
                        warn!("skipping {}: {e}", entry.display_name());
                        record.status = EntryStatus::unresolved(&e);
                    }
                    Err(e) => return Err(e),
                },
            }

            if matches!(
                record.status,
                EntryStatus::Unresolved { .. } | EntryStatus::Ambiguous { .. }
            ) {
                self.report.skipped += 1;
            }
            manifest.entries.insert(entry.toc_offset, record);
        }

        manifest.save(&pending.manifest)
    }

    fn write_payload(
        &self,
        output: &Path,
        entry: &PresEntry,
        data: &[u8],
        used_names: &mut HashSet<PathBuf>,
    ) -> Result<PathBuf> {
        let path = unique_path(output.join(entry.relative_path()), used_names);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if self.options.overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options.open(&path)?;
        file.write_all(data)?;
        Ok(path)
    }

    /// Queue an extracted payload that is itself a container, returning its manifest path
    fn queue_nested(
        &mut self,
        file: &Path,
        data: &[u8],
        parent: &PendingContainer,
    ) -> Option<PathBuf> {
        if !self.options.recursive {
            return None;
        }
        let kind = ContainerKind::detect(data, file)?;
        let manifest = manifest_path(file);
        debug!("queueing nested {kind:?} container {}", file.display());
        self.queue.push_back(PendingContainer {
            source: file.to_path_buf(),
            output: extraction_dir(file.with_extension("")),
            manifest: manifest.clone(),
            kind,
            depth: parent.depth + 1,
        });
        Some(manifest)
    }

    fn queue_reference(&mut self, path: &Path, parent: &PendingContainer) -> Result<()> {
        if !self.options.recursive {
            return Ok(());
        }
        let Some(kind) = sniff(path)? else {
            return Ok(());
        };
        let stem = path.file_stem().unwrap_or(path.as_os_str());
        let output = extraction_dir(parent.output.join(stem));
        debug!("queueing referenced {kind:?} container {}", path.display());
        self.queue.push_back(PendingContainer {
            source: path.to_path_buf(),
            manifest: manifest_path(&output),
            output,
            kind,
            depth: parent.depth + 1,
        });
        Ok(())
    }

    /// Find the file a `NoSet` entry refers to
    fn resolve_reference(&self, entry: &PresEntry, pending: &PendingContainer) -> EntryStatus {
        let Some(reference) = entry.names.as_ref().and_then(NameRecord::reference) else {
            return EntryStatus::unresolved("entry has no name to resolve");
        };

        let roots = if self.options.search_roots.is_empty() {
            vec![pending.output.clone(), self.root_dir.clone()]
        } else {
            self.options.search_roots.clone()
        };

        let mut seen = HashSet::new();
        let candidates: Vec<PathBuf> = roots
            .iter()
            .map(|root| root.join(&reference))
            .filter(|path| path.is_file())
            .filter(|path| seen.insert(fs::canonicalize(path).unwrap_or(path.clone())))
            .collect();

        match candidates.as_slice() {
            [] => {
                warn!("{} not found in any search root", reference.display());
                EntryStatus::unresolved(format!("{} not found", reference.display()))
            }
            [path] => EntryStatus::Reference { path: path.clone() },
            _ => {
                warn!(
                    "{} matches {} files, not following it",
                    reference.display(),
                    candidates.len()
                );
                EntryStatus::Ambiguous { candidates }
            }
        }
    }
}

/// `path`, or the first `_NNNN` suffixed variant of it not in `used`
fn unique_path(path: PathBuf, used: &mut HashSet<PathBuf>) -> PathBuf {
    if used.insert(path.clone()) {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    for counter in 1u32.. {
        let name = match &extension {
            Some(extension) => format!("{stem}_{counter:04}.{extension}"),
            None => format!("{stem}_{counter:04}"),
        };
        let candidate = path.with_file_name(name);
        if used.insert(candidate.clone()) {
            return candidate;
        }
    }
    path
}

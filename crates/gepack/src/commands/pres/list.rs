use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Args;
use gepack_pres::extract::sniff;
use gepack_pres::read::{ContainerKind, ParseOptions, PresArchive, PresEntry};
use gepack_pres::types::EntryKind;
use gepack_pres::Locator;
use itertools::Itertools;
use miette::{miette, Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use tracing::warn;
use walkdir::WalkDir;

use super::Binding;

#[derive(Args)]
pub struct ListArgs {
    /// A container, or a directory searched for containers
    #[arg(short, long, value_name = "PATH")]
    file: PathBuf,

    /// Meaning of the third name pointer
    #[arg(long, value_enum, default_value_t)]
    binding: Binding,

    /// Only print the summary of each container
    #[arg(long, default_value_t = false)]
    summary: bool,
}

/// Storage class and physical offset of an entry
fn locator_label(locator: &Locator) -> String {
    match locator.physical_offset() {
        Some(offset) => format!("{}@{offset:#x}", locator.label()),
        None => locator.label().to_string(),
    }
}

fn kind_label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Empty => "empty",
        EntryKind::Dummy => "dummy",
        EntryKind::Live => "live",
    }
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        if !self.file.is_dir() {
            let kind = sniff(&self.file)
                .into_diagnostic()
                .context(format!("path: {}", self.file.display()))?
                .ok_or(miette!("{} is not a container", self.file.display()))?;
            return self.list(&self.file, kind);
        }

        for entry in WalkDir::new(&self.file)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            match sniff(entry.path()) {
                Ok(Some(kind)) => self.list(entry.path(), kind)?,
                Ok(None) => {}
                Err(e) => warn!("unable to read {}: {e}", entry.path().display()),
            }
        }
        Ok(())
    }

    fn list(&self, path: &Path, kind: ContainerKind) -> Result<()> {
        let f = File::open(path)
            .into_diagnostic()
            .context(format!("path: {}", path.display()))?;
        let archive = PresArchive::open(
            BufReader::new(f),
            kind,
            ParseOptions::builder().binding(self.binding.into()).build(),
        )
        .context(format!("parsing {}", path.display()))?;

        println!(
            "{} ({} bytes)",
            path.display().bold(),
            archive.container_len()
        );
        if let Some(header) = archive.header() {
            println!(
                "  version {}, group table at {:#x} (revision {}), checksum {:#06x}",
                header.version, header.group_offset, header.group_version, header.checksum
            );
            if header.sideload_size != 0 {
                println!(
                    "  sideloaded block of {} bytes at {:#x}",
                    header.sideload_size, header.sideload_offset
                );
            }
        }
        for (g, group) in archive.groups().iter().enumerate() {
            let state = if group.is_empty() { " (empty)" } else { "" };
            println!(
                "  group {g}: {} records at {:#x}{}",
                group.entry_count,
                group.entry_offset,
                state.dimmed()
            );
        }

        if !self.summary {
            for entry in archive.entries() {
                self.print_entry(entry);
            }
        }

        let counts = archive
            .entries()
            .iter()
            .counts_by(|e| match e.kind() {
                EntryKind::Live => e.locator.label(),
                kind => kind_label(kind),
            })
            .into_iter()
            .sorted()
            .map(|(storage, count)| format!("{count} {storage}"))
            .join(", ");
        println!(
            "  {} entries in {} groups ({counts})",
            archive.len(),
            archive.groups().len()
        );
        Ok(())
    }

    fn print_entry(&self, entry: &PresEntry) {
        let name = entry.display_name();
        let name = match entry.kind() {
            EntryKind::Live => name.green().to_string(),
            _ => name.dimmed().to_string(),
        };
        println!(
            "  {:>3}:{:<4} {:#010x} {:<18} {:>10} {:>10}  {}",
            entry.group,
            entry.index,
            entry.toc_offset,
            locator_label(&entry.locator).cyan(),
            entry.record.compressed_size,
            entry.record.decompressed_size,
            name
        );
    }
}

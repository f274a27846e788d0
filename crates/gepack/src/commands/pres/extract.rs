use std::path::PathBuf;

use clap::Args;
use gepack_pres::extract::{extract, manifest_path, ExtractOptions};
use gepack_pres::{BlobSet, ExtractionManifest};
use itertools::Itertools;
use miette::{miette, Context, Result};
use owo_colors::OwoColorize;
use tracing::{info, warn};

use super::{parent_dir, Binding};

#[derive(Args)]
pub struct ExtractArgs {
    /// An input container
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory, the manifest is written next to it
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Directory holding package.rdp, data.rdp and patch.rdp, defaults to the container's
    #[arg(short, long, value_name = "DIR")]
    blobs: Option<PathBuf>,

    /// Directories searched for referenced files, in order
    #[arg(long = "search-root", value_name = "DIR")]
    search_roots: Vec<PathBuf>,

    /// Meaning of the third name pointer
    #[arg(long, value_enum, default_value_t)]
    binding: Binding,

    /// Do not descend into nested or referenced containers
    #[arg(long, default_value_t = false)]
    no_recursive: bool,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        if !self.file.is_file() {
            return Err(miette!("{} is not a file", self.file.display()));
        }
        let blob_dir = self.blobs.clone().unwrap_or_else(|| parent_dir(&self.file));
        let blobs = BlobSet::open_dir(&blob_dir, false)
            .context(format!("opening blobs in {}", blob_dir.display()))?;

        let options = ExtractOptions::builder()
            .output(&self.directory)
            .recursive(!self.no_recursive)
            .search_roots(self.search_roots.clone())
            .binding(self.binding.into())
            .overwrite(self.overwrite)
            .build();
        let report = extract(&self.file, &blobs, options)
            .context(format!("extracting {}", self.file.display()))?;

        for (container, reason) in &report.failed {
            warn!("{}: {reason}", container.display());
        }
        info!(
            "wrote {} files and {} manifests, {} entries skipped",
            report.extracted.green(),
            report.manifests.len(),
            report.skipped.yellow()
        );
        let manifest_file = manifest_path(&self.directory);
        let manifest = ExtractionManifest::load(&manifest_file)
            .context(format!("loading {}", manifest_file.display()))?;
        let statuses = manifest
            .status_counts()
            .into_iter()
            .map(|(status, count)| format!("{count} {status}"))
            .join(", ");
        info!("manifest: {} ({statuses})", manifest_file.display());
        Ok(())
    }
}

use std::fs;
use std::path::PathBuf;

use clap::Args;
use gepack_pres::alloc::PlacementPolicy;
use gepack_pres::repack::{repack_tree, RepackOptions};
use gepack_pres::{BlobKind, BlobSet, ExtractionManifest};
use miette::{miette, Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use tracing::{info, warn};

use super::parent_dir;

#[derive(Args)]
pub struct RepackArgs {
    /// The manifest written by `pres extract`
    #[arg(short, long, value_name = "FILE")]
    manifest: PathBuf,

    /// A target container
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Directory holding the original blobs, defaults to the original container's
    #[arg(short, long, value_name = "DIR")]
    blobs: Option<PathBuf>,

    /// Copy the blobs here and update the copies instead of the originals
    #[arg(long, value_name = "DIR", conflicts_with = "in_place")]
    blob_output: Option<PathBuf>,

    /// Update the original blobs
    #[arg(long, default_value_t = false)]
    in_place: bool,

    /// Only append relocated payloads, required when other containers share the blobs
    #[arg(long, default_value_t = false)]
    append: bool,

    /// Rewrite every payload, even unchanged ones
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl RepackArgs {
    pub fn handle(&self) -> Result<()> {
        if self.output.exists() && !self.overwrite {
            return Err(miette!("{} already exists", self.output.display()));
        }

        let manifest = ExtractionManifest::load(&self.manifest)
            .context(format!("loading {}", self.manifest.display()))?;
        let container = manifest.container_path(&self.manifest);
        let source = self.blobs.clone().unwrap_or_else(|| parent_dir(&container));

        let blob_dir = match (&self.blob_output, self.in_place) {
            (Some(target), _) => {
                fs::create_dir_all(target)
                    .into_diagnostic()
                    .context(format!("creating {}", target.display()))?;
                for blob in BlobKind::ALL {
                    let from = source.join(blob.file_name());
                    if from.is_file() {
                        info!("copying {} to {}", from.display(), target.display());
                        fs::copy(&from, target.join(blob.file_name()))
                            .into_diagnostic()
                            .context(format!("copying {}", from.display()))?;
                    }
                }
                target.clone()
            }
            (None, true) => source,
            (None, false) => {
                return Err(miette!(
                    "pass --blob-output to write copies of the blobs, or --in-place to update them"
                ))
            }
        };

        let blobs = BlobSet::open_dir(&blob_dir, true)
            .context(format!("opening blobs in {}", blob_dir.display()))?;
        let policy = if self.append {
            PlacementPolicy::Append
        } else {
            PlacementPolicy::FirstFit
        };
        let report = repack_tree(
            &self.manifest,
            &self.output,
            &blobs,
            RepackOptions::builder()
                .policy(policy)
                .force(self.force)
                .build(),
        )
        .context(format!("repacking {}", self.manifest.display()))?;

        for (toc_offset, reason) in &report.failed {
            warn!("entry at {toc_offset:#x}: {}", reason.red());
        }
        info!(
            "{} rewritten, {} unchanged, {} relocated, {} deduplicated",
            report.rewritten.green(),
            report.unchanged,
            report.relocated,
            report.deduplicated
        );
        Ok(())
    }
}

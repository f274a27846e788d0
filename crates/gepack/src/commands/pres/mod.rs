use std::path::{Path, PathBuf};

use gepack_pres::names::NameBinding;

pub mod extract;
pub mod list;
pub mod repack;

#[derive(clap::Subcommand)]
pub enum PresCommands {
    /// List the entries of one or more containers
    List(list::ListArgs),
    /// Extract a container tree into a directory
    Extract(extract::ExtractArgs),
    /// Repack an extracted container tree
    Repack(repack::RepackArgs),
}

impl PresCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            PresCommands::List(list) => list.handle(),
            PresCommands::Extract(extract) => extract.handle(),
            PresCommands::Repack(repack) => repack.handle(),
        }
    }
}

/// Which string the third name pointer holds
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum Binding {
    #[default]
    Path,
    SubPath,
}

impl From<Binding> for NameBinding {
    fn from(value: Binding) -> Self {
        match value {
            Binding::Path => NameBinding::Path,
            Binding::SubPath => NameBinding::SubPath,
        }
    }
}

/// Directory holding `file`, or the current one
fn parent_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

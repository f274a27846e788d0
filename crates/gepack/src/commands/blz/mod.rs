use gepack_pres::CompressionMethod;

pub mod pack;
pub mod unpack;

#[derive(clap::Subcommand)]
pub enum BlzCommands {
    /// Compress a file into a block stream
    Pack(pack::PackArgs),
    /// Decompress a block stream
    Unpack(unpack::UnpackArgs),
}

impl BlzCommands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            BlzCommands::Pack(pack) => pack.handle(),
            BlzCommands::Unpack(unpack) => unpack.handle(),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum Method {
    #[default]
    Blz2,
    Blz4,
}

impl From<Method> for CompressionMethod {
    fn from(value: Method) -> Self {
        match value {
            Method::Blz2 => CompressionMethod::Blz2,
            Method::Blz4 => CompressionMethod::Blz4,
        }
    }
}

fn create(path: &std::path::Path, overwrite: bool) -> miette::Result<std::fs::File> {
    use miette::{Context, IntoDiagnostic};

    if !overwrite {
        std::fs::File::create_new(path)
            .into_diagnostic()
            .context(format!("creating {}", path.display()))
    } else {
        std::fs::File::create(path)
            .into_diagnostic()
            .context(format!("creating {}", path.display()))
    }
}

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use gepack_pres::compression::compress;
use miette::{Context, IntoDiagnostic, Result};
use tracing::info;

use super::{create, Method};

#[derive(Args)]
pub struct PackArgs {
    /// An input file
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// A target file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Block stream format
    #[arg(long, value_enum, default_value_t)]
    format: Method,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl PackArgs {
    pub fn handle(&self) -> Result<()> {
        let data = std::fs::read(&self.input)
            .into_diagnostic()
            .context(format!("path: {}", self.input.display()))?;
        let packed = compress(&data, self.format.into())?;

        let mut out = create(&self.output, self.overwrite)?;
        out.write_all(&packed).into_diagnostic()?;
        info!(
            "packed {} bytes into {} bytes of {:?}",
            data.len(),
            packed.len(),
            self.format
        );
        Ok(())
    }
}

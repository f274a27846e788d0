use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use gepack_pres::compression::decompress;
use gepack_pres::CompressionMethod;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::info;

use super::create;

#[derive(Args)]
pub struct UnpackArgs {
    /// An input block stream
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// A target file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl UnpackArgs {
    pub fn handle(&self) -> Result<()> {
        let data = std::fs::read(&self.input)
            .into_diagnostic()
            .context(format!("path: {}", self.input.display()))?;

        let method = CompressionMethod::detect(&data);
        if method == CompressionMethod::None {
            return Err(miette!("{} is not a block stream", self.input.display()));
        }
        let unpacked = decompress(&data)
            .ok_or(miette!("{} is a malformed {method} stream", self.input.display()))?;

        let mut out = create(&self.output, self.overwrite)?;
        out.write_all(&unpacked).into_diagnostic()?;
        info!("unpacked {} bytes of {method}", unpacked.len());
        Ok(())
    }
}

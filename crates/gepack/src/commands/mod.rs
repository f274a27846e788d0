pub mod blz;
pub mod pres;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle PRES/RES containers
    Pres {
        #[command(subcommand)]
        command: pres::PresCommands,
    },
    /// Handle BLZ2/BLZ4 block streams
    Blz {
        #[command(subcommand)]
        command: blz::BlzCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Pres { command } => command.handle(),
            Commands::Blz { command } => command.handle(),
        }
    }
}

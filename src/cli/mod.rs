use clap::{Parser, Subcommand};

pub mod run;
pub mod schema;

use run::RunArgs;
use schema::SchemaArgs;

#[derive(Parser, Debug)]
#[command(
    name = "machinechat-bridge",
    about = "Forwards flow messages to a Machinechat data collector",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process newline-delimited JSON messages from stdin
    Run(RunArgs),

    /// Emit the JSON-Schema of the node configuration
    Schema(SchemaArgs),
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Run(args) => run::execute(args).await,
            Commands::Schema(args) => schema::execute(args),
        }
    }
}

use clap::Parser;

mod cli;

use cli::Cli;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    Cli::parse().execute().await
}

use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Args;
use schemars::schema_for;

use machinechat_bridge::config::RunConfig;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Write the schema to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run_config_schema() -> anyhow::Result<String> {
    let schema = schema_for!(RunConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}

pub fn execute(args: SchemaArgs) -> anyhow::Result<()> {
    let text = run_config_schema()?;
    match args.out {
        Some(path) => {
            fs::write(&path, text)
                .with_context(|| format!("could not write schema to {}", path.display()))?;
            println!("Schema written to {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

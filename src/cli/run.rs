use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use machinechat_bridge::bridge::{BridgeError, MachinechatBridge};
use machinechat_bridge::config::RunConfig;
use machinechat_bridge::context::{InMemoryStore, NodeContext, Scope};
use machinechat_bridge::logger::{init_tracing, LogConfig};
use machinechat_bridge::message::Message;
use machinechat_bridge::node::{NodeOutput, NodeStatus};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Node configuration (YAML or JSON)
    #[arg(long, short)]
    pub config: PathBuf,

    /// Environment file, loaded before the configuration
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write rolling log files into this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(&LogConfig::new(args.log_level.clone(), args.log_dir.clone()))?;

    match dotenvy::from_path(&args.env_file) {
        Ok(()) => info!("Loaded environment from {}", args.env_file.display()),
        Err(err) if err.not_found() => debug!("no env file at {}", args.env_file.display()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("could not load {}", args.env_file.display()));
        }
    }

    let config = RunConfig::load(&args.config)
        .with_context(|| format!("invalid configuration in {}", args.config.display()))?;
    let context = seeded_context(&config)?;
    let bridge = Arc::new(MachinechatBridge::new(config.node, context)?);
    info!(
        "{} reading messages from stdin; press Ctrl-C to exit",
        MachinechatBridge::TYPE_NAME
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    let mut line_no = 0usize;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("could not read stdin")? else {
                    break;
                };
                line_no += 1;
                let Some(msg) = parse_line(&line, line_no) else {
                    continue;
                };
                let bridge = bridge.clone();
                tasks.spawn(async move {
                    let out = StdoutOutput { line: line_no };
                    bridge.on_input(msg, &out).await;
                });
            }
            _ = signal::ctrl_c() => {
                info!("interrupted; waiting for {} in-flight messages", tasks.len());
                break;
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "message task failed");
        }
    }
    info!("input closed after {line_no} lines");
    Ok(())
}

fn seeded_context(config: &RunConfig) -> anyhow::Result<NodeContext> {
    let flow = InMemoryStore::new();
    let global = InMemoryStore::new();
    for (scope, store, key, value) in config.seeds() {
        let target = match scope {
            Scope::Flow => &flow,
            Scope::Global => &global,
        };
        target
            .insert(&store, &key, value)
            .with_context(|| format!("could not seed {scope}[{store}].{key}"))?;
    }
    Ok(NodeContext::new(flow, global))
}

fn parse_line(line: &str, line_no: usize) -> Option<Message> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Message>(line) {
        Ok(msg) => Some(msg),
        Err(err) => {
            warn!(line = line_no, error = %err, "skipping input line");
            None
        }
    }
}

/// Prints forwarded messages as JSON lines; status and errors go to the log.
struct StdoutOutput {
    line: usize,
}

impl NodeOutput for StdoutOutput {
    fn status(&self, status: NodeStatus) {
        if status.is_error() {
            warn!(line = self.line, status = %status, "node status");
        } else {
            debug!(line = self.line, status = %status, "node status");
        }
    }

    fn send(&self, msg: Message) {
        match serde_json::to_string(&msg) {
            Ok(text) => println!("{text}"),
            Err(err) => error!(line = self.line, error = %err, "could not encode message"),
        }
    }

    fn done(&self, error: Option<BridgeError>) {
        if let Some(err) = error {
            error!(line = self.line, error = %err, "message failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machinechat_bridge::context::{ContextStore, DEFAULT_STORE};
    use serde_json::json;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("   ", 1), None);
        assert_eq!(parse_line("[1, 2]", 2), None);
        assert_eq!(parse_line("{broken", 3), None);
        let msg = parse_line(r#"{"_msgid": "a", "payload": 3}"#, 4).unwrap();
        assert_eq!(msg.payload(), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_seeded_context() {
        let config: RunConfig = serde_json::from_value(json!({
            "inputHostURL": "localhost",
            "inputPort": 9123,
            "inputUniqueIdentifier": "{{flow.site}}",
            "flow": {"default": {"site": "north"}},
            "global": {"file": {"serial": 7}}
        }))
        .unwrap();
        let context = seeded_context(&config).unwrap();
        assert_eq!(
            context.store(Scope::Flow).get("site", DEFAULT_STORE).await.unwrap(),
            Some(json!("north"))
        );
        assert_eq!(
            context.store(Scope::Global).get("serial", "file").await.unwrap(),
            Some(json!(7))
        );
    }
}

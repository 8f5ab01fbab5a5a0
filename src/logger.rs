use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub const LOG_FILE: &str = "machinechat-bridge.log";
pub const EVENT_FILE: &str = "machinechat-bridge-requests.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `info` or `machinechat_bridge=debug`.
    pub log_level: String,
    /// When set, a daily text log and a JSON request log are written here.
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(log_level: impl Into<String>, log_dir: Option<PathBuf>) -> Self {
        Self {
            log_level: log_level.into(),
            log_dir,
        }
    }

    /// `(text log, request log)` inside the log directory.
    pub fn file_paths(&self) -> Option<(PathBuf, PathBuf)> {
        self.log_dir
            .as_deref()
            .map(|dir| (dir.join(LOG_FILE), dir.join(EVENT_FILE)))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info", None)
    }
}

/// Installs the global subscriber: stderr always, plus rolling files when
/// a log directory is configured. Events with `target: "request"` also go to
/// the JSON file, one line each.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log level `{}`", config.log_level))?;

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (txt_layer, json_layer) = match config.file_paths() {
        Some((log_file, event_file)) => {
            std::fs::create_dir_all(parent_of(&log_file))
                .with_context(|| format!("could not create log directory {}", log_file.display()))?;
            let txt_appender = appender(&log_file)?;
            let json_appender = appender(&event_file)?;
            let txt_layer = fmt::layer().with_writer(txt_appender).with_ansi(false);
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_appender)
                .with_target(true)
                .with_filter(EnvFilter::new("request=info"));
            (Some(txt_layer), Some(json_layer))
        }
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .with(txt_layer)
        .with(json_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;
    Ok(())
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

fn appender(path: &Path) -> Result<RollingFileAppender> {
    let file_name = path
        .file_name()
        .with_context(|| format!("log path {} has no file name", path.display()))?;
    Ok(RollingFileAppender::new(Rotation::DAILY, parent_of(path), file_name))
}

use std::{env, fs, path::Path};

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::context::Scope;

/// Path the collector accepts forwarded messages on.
pub const COLLECTOR_PATH: &str = "/v1/node-red/msg";

/// Status code a collector returns for an accepted message.
pub const DEFAULT_SUCCESS_CODE: &str = "CODEC-NODERED-001";

pub const HOST_ENV: &str = "MACHINECHAT_HOST";
pub const PORT_ENV: &str = "MACHINECHAT_PORT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("`{0}` is required")]
    Missing(&'static str),

    #[error("`inputPort` must be a port number, got `{0}`")]
    InvalidPort(String),

    #[error("invalid collector url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Where a processed message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Forward to the collector and route on its acknowledgement.
    #[default]
    Msg,
    /// Write into the flow context.
    Flow,
    /// Write into the global context.
    Global,
}

impl FieldType {
    pub fn scope(self) -> Option<Scope> {
        match self {
            FieldType::Msg => None,
            FieldType::Flow => Some(Scope::Flow),
            FieldType::Global => Some(Scope::Global),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Str,
    Json,
}

/// Configuration of one bridge node, as the flow editor stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Collector host name (a `http://` or `https://` prefix is allowed).
    #[serde(rename = "inputHostURL", deserialize_with = "stringified")]
    #[schemars(with = "String")]
    pub input_host_url: String,

    #[serde(deserialize_with = "stringified")]
    #[schemars(with = "Value")]
    pub input_port: String,

    /// Identifier template, e.g. `{{payload.device}}-{{flow.site}}`.
    #[serde(deserialize_with = "stringified")]
    #[schemars(with = "Value")]
    pub input_unique_identifier: String,

    /// Copy the collector's `mc` data into `payload.mc` of the forwarded message.
    #[serde(default)]
    pub copy_machinechat_data: bool,

    #[serde(default = "BridgeConfig::default_field")]
    pub field: String,

    #[serde(default)]
    pub field_type: FieldType,

    #[serde(default)]
    pub output: OutputFormat,

    #[serde(default = "BridgeConfig::default_success_code")]
    pub success_code: String,

    /// Reported to the collector as `node_red_context.nodeRedVersion`.
    #[serde(default = "BridgeConfig::default_node_red_version")]
    pub node_red_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

impl BridgeConfig {
    pub fn new(host: impl Into<String>, port: impl ToString, identifier: impl Into<String>) -> Self {
        Self {
            input_host_url: host.into(),
            input_port: port.to_string(),
            input_unique_identifier: identifier.into(),
            copy_machinechat_data: false,
            field: Self::default_field(),
            field_type: FieldType::default(),
            output: OutputFormat::default(),
            success_code: Self::default_success_code(),
            node_red_version: Self::default_node_red_version(),
            connect_timeout_ms: None,
        }
    }

    fn default_field() -> String {
        "payload".to_string()
    }

    fn default_success_code() -> String {
        DEFAULT_SUCCESS_CODE.to_string()
    }

    fn default_node_red_version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_host_url.trim().is_empty() {
            return Err(ConfigError::Missing("inputHostURL"));
        }
        if self.input_port.trim().is_empty() {
            return Err(ConfigError::Missing("inputPort"));
        }
        if self.input_unique_identifier.is_empty() {
            return Err(ConfigError::Missing("inputUniqueIdentifier"));
        }
        self.port()?;
        self.collector_url()?;
        Ok(())
    }

    pub fn port(&self) -> Result<u16, ConfigError> {
        self.input_port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(self.input_port.clone()))
    }

    /// `http://{host}:{port}/v1/node-red/msg`
    pub fn collector_url(&self) -> Result<Url, ConfigError> {
        let host = self.input_host_url.trim().trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        let mut url = Url::parse(&base)?;
        url.set_port(Some(self.port()?))
            .map_err(|_| ConfigError::InvalidPort(self.input_port.clone()))?;
        url.set_path(COLLECTOR_PATH);
        Ok(url)
    }

    /// Environment overrides for the collector address.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var(HOST_ENV) {
            info!("collector host overridden by {HOST_ENV}");
            self.input_host_url = host;
        }
        if let Ok(port) = env::var(PORT_ENV) {
            info!("collector port overridden by {PORT_ENV}");
            self.input_port = port;
        }
    }
}

/// A node configuration plus the initial flow and global context values
/// for running it standalone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunConfig {
    #[serde(flatten)]
    pub node: BridgeConfig,

    /// Seed values for the flow context, by store name then key.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    #[schemars(with = "std::collections::HashMap<String, std::collections::HashMap<String, Value>>")]
    pub flow: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    #[schemars(with = "std::collections::HashMap<String, std::collections::HashMap<String, Value>>")]
    pub global: Map<String, Value>,
}

impl RunConfig {
    /// Loads YAML (`.yaml`/`.yml`) or JSON (anything else), applies
    /// environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let mut config: RunConfig = if is_yaml {
            serde_yaml_bw::from_str(&text).map_err(|e| ConfigError::Parse {
                path: display.clone(),
                reason: e.to_string(),
            })?
        } else {
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: display.clone(),
                reason: e.to_string(),
            })?
        };
        config.node.apply_env_overrides();
        config.node.validate()?;
        let path = &display;
        info!(path = %path, "Loaded bridge config");
        Ok(config)
    }

    /// Seed entries as `(scope, store, key, value)`.
    pub fn seeds(&self) -> Vec<(Scope, String, String, Value)> {
        let mut seeds = Vec::new();
        for (scope, stores) in [(Scope::Flow, &self.flow), (Scope::Global, &self.global)] {
            for (store, values) in stores {
                if let Value::Object(values) = values {
                    for (key, value) in values {
                        seeds.push((scope, store.clone(), key.clone(), value.clone()));
                    }
                }
            }
        }
        seeds
    }
}

/// Accepts a string, number or boolean and keeps its text form.
fn stringified<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

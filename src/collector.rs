//! HTTP client for the Machinechat data collector.
use std::error::Error as _;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, Level};
use url::Url;

use crate::message::Message;

static HEX_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)&#x([0-9a-f]{1,6});").expect("valid hex entity regex"));

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectorError {
    #[error("could not build http client: {0}")]
    Client(String),

    /// Connection, DNS, reset or body-stream failure. Holds the raw error text.
    #[error("{0}")]
    Transport(String),

    #[error("could not encode request body: {0}")]
    Encode(String),

    #[error("collector answered with HTTP {0}")]
    Status(u16),

    #[error("invalid collector response: {0}")]
    Parse(String),
}

/// The collector's reply, read leniently: unknown or mistyped fields become
/// `None` rather than errors so the classifier can report them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Acknowledgement {
    pub context: Option<AckContext>,
    pub msg: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AckContext {
    pub status: Option<AckStatus>,
    /// Collector-side enrichment data.
    pub mc: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AckStatus {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl Acknowledgement {
    pub fn from_value(value: Value) -> Self {
        let context = present(value.get("machinechat_context")).map(|ctx| AckContext {
            status: present(ctx.get("status")).map(|status| AckStatus {
                code: present(status.get("code")).map(text_of),
                message: present(status.get("message")).map(text_of),
            }),
            mc: present(ctx.get("mc")).cloned(),
        });
        let msg = value
            .get("msg")
            .and_then(|m| Message::from_value(m.clone()).ok());
        Self { context, msg }
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Expands `&#xHH;` references (1 to 6 hex digits). References that are not
/// valid code points are left as written.
pub fn decode_entities(text: &str) -> String {
    HEX_ENTITY
        .replace_all(text, |caps: &Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn build_request_body(
    identifier: &str,
    message: &Message,
    node_red_version: &str,
    timestamp_ms: i64,
) -> Value {
    json!({
        "machinechat_context": {
            "timestamp": timestamp_ms,
            "unique_identifier": decode_entities(identifier),
        },
        "node_red_context": {
            "nodeRedVersion": node_red_version,
        },
        "msg": message,
    })
}

#[derive(Debug, Clone)]
pub struct CollectorClient {
    http: Client,
    url: Url,
    node_red_version: String,
}

impl CollectorClient {
    pub fn new(
        url: Url,
        node_red_version: impl Into<String>,
        connect_timeout: Option<Duration>,
    ) -> Result<Self, CollectorError> {
        let mut builder = Client::builder()
            .redirect(Policy::none())
            .no_proxy();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| CollectorError::Client(error_chain(&e)))?;
        Ok(Self {
            http,
            url,
            node_red_version: node_red_version.into(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// One POST, the whole response body read before anything is parsed.
    #[tracing::instrument(name = "collector_send", skip(self, message), fields(url = %self.url))]
    pub async fn send(&self, identifier: &str, message: &Message) -> Result<Acknowledgement, CollectorError> {
        let started = Instant::now();
        let result = self.exchange(identifier, message).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

        tracing::event!(
            target: "request",
            Level::INFO,
            request = "collector",
            latency_ms = latency_ms,
            status = match &result {
                Ok(_) => "ok",
                Err(CollectorError::Transport(_)) => "transport_error",
                Err(_) => "error",
            },
        );
        result
    }

    async fn exchange(&self, identifier: &str, message: &Message) -> Result<Acknowledgement, CollectorError> {
        let body = build_request_body(
            identifier,
            message,
            &self.node_red_version,
            Utc::now().timestamp_millis(),
        );
        // a buffered body gives reqwest an exact Content-Length
        let bytes = serde_json::to_vec(&body).map_err(|e| CollectorError::Encode(e.to_string()))?;

        let response = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| CollectorError::Transport(error_chain(&e)))?;

        let status = response.status();
        let mut raw = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| CollectorError::Transport(error_chain(&e)))?;
            raw.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&raw);
        debug!(status = status.as_u16(), body = %text, "collector response");

        if status != StatusCode::OK {
            return Err(CollectorError::Status(status.as_u16()));
        }
        let value: Value =
            serde_json::from_str(&text).map_err(|e| CollectorError::Parse(e.to_string()))?;
        Ok(Acknowledgement::from_value(value))
    }
}

/// `reqwest` keeps the useful part ("Connection refused") in the source chain.
fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

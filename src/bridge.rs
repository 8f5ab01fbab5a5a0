use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classifier::{Classifier, EMPTY_PAYLOAD, UNKNOWN_RESPONSE};
use crate::collector::{CollectorClient, CollectorError};
use crate::config::{BridgeConfig, ConfigError, OutputFormat};
use crate::context::{ContextKey, NodeContext, Scope, StoreError};
use crate::message::Message;
use crate::node::{NodeOutput, NodeStatus};
use crate::template::{MergedContext, ResolvedTokenCache, Template, TemplateError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("problem with request: {0}")]
    Transport(String),

    #[error("context write failed: {0}")]
    Store(#[from] StoreError),

    #[error("invalid identifier template: {0}")]
    Template(#[from] TemplateError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Collector(#[from] CollectorError),
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

/// Forwards messages to a Machinechat collector and routes them on the
/// collector's acknowledgement, or writes them into a context store.
#[derive(Debug)]
pub struct MachinechatBridge {
    config: BridgeConfig,
    identifier: Template,
    collector: CollectorClient,
    classifier: Classifier,
    context: NodeContext,
}

impl MachinechatBridge {
    pub const TYPE_NAME: &'static str = "machinechat-bridge";

    pub fn new(config: BridgeConfig, context: NodeContext) -> Result<Self, BridgeError> {
        config.validate()?;
        let identifier = Template::compile(&config.input_unique_identifier)?;
        let collector = CollectorClient::new(
            config.collector_url()?,
            config.node_red_version.clone(),
            config.connect_timeout_ms.map(Duration::from_millis),
        )?;
        let classifier = Classifier::new(config.success_code.clone(), config.copy_machinechat_data);
        info!(
            url = %collector.url(),
            identifier = identifier.source(),
            mode = ?config.field_type,
            "machinechat bridge ready"
        );
        Ok(Self {
            config,
            identifier,
            collector,
            classifier,
            context,
        })
    }

    /// Fetches every store value the identifier template refers to. Missing
    /// values and store failures leave the entry out.
    pub async fn resolve_tokens(&self) -> ResolvedTokenCache {
        let mut cache = ResolvedTokenCache::new();
        for (name, reference) in self.identifier.store_references() {
            let store = self.context.store(reference.scope);
            match store.get(&reference.field, &reference.store).await {
                Ok(Some(value)) => cache.insert(name, value),
                Ok(None) => debug!(%reference, "context value not set"),
                Err(err) => warn!(%reference, error = %err, "context lookup failed"),
            }
        }
        cache
    }

    pub fn render_identifier(&self, msg: &Message, cache: &ResolvedTokenCache) -> String {
        let escape = self.config.output == OutputFormat::Json;
        self.identifier
            .render(&MergedContext::new(msg.as_value(), cache, escape))
    }

    /// Handles one inbound message. Every path reports a status before it
    /// sends or completes.
    #[tracing::instrument(name = "machinechat_bridge_process", skip(self, msg, out), fields(msgid = tracing::field::Empty))]
    pub async fn on_input(&self, mut msg: Message, out: &dyn NodeOutput) {
        msg.ensure_id();
        tracing::Span::current().record("msgid", msg.id().unwrap_or_default());
        if msg.parse_json_payload() {
            debug!("payload parsed from JSON text");
        }

        match self.config.field_type.scope() {
            None => self.forward_to_collector(msg, out).await,
            Some(scope) => self.write_to_context(scope, msg, out).await,
        }
    }

    async fn forward_to_collector(&self, msg: Message, out: &dyn NodeOutput) {
        if msg.has_empty_payload() {
            warn!("{EMPTY_PAYLOAD}");
            out.status(NodeStatus::error(EMPTY_PAYLOAD));
            out.send(msg);
            out.done(None);
            return;
        }

        let cache = self.resolve_tokens().await;
        let identifier = self.render_identifier(&msg, &cache);
        debug!(%identifier, "identifier rendered");

        out.status(NodeStatus::clear());
        match self.collector.send(&identifier, &msg).await {
            Ok(ack) => {
                let verdict = self.classifier.classify(ack, &msg);
                let status = verdict.status();
                if status.is_error() {
                    warn!(status = %status, "collector did not accept message");
                }
                out.status(status);
                if let Some(forward) = verdict.into_forward(msg) {
                    out.send(forward);
                }
                out.done(None);
            }
            Err(CollectorError::Transport(reason)) => {
                error!(error = %reason, "problem with request");
                out.status(NodeStatus::error(reason.as_str()));
                out.done(Some(BridgeError::Transport(reason)));
            }
            Err(err) => {
                warn!(error = %err, "unusable collector response");
                out.status(NodeStatus::error(UNKNOWN_RESPONSE));
                out.done(None);
            }
        }
    }

    async fn write_to_context(&self, scope: Scope, msg: Message, out: &dyn NodeOutput) {
        let key = ContextKey::parse(&self.config.field);
        let store = key.store_or_default();
        match self.context.store(scope).set(&key.key, msg.as_value().clone(), store).await {
            Ok(()) => {
                debug!(%scope, store, key = %key.key, "message stored");
                out.send(msg);
                out.done(None);
            }
            Err(err) => {
                error!(%scope, store, key = %key.key, error = %err, "context write failed");
                out.done(Some(err.into()));
            }
        }
    }
}

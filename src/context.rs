use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::util::{get_path, set_path};

pub const DEFAULT_STORE: &str = "default";

static CONTEXT_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#:\((\S+?)\)::(.*)$").expect("valid context key regex"));

/// Which shared context a store lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Flow,
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Flow => f.write_str("flow"),
            Scope::Global => f.write_str("global"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("context store `{0}` is not configured")]
    UnknownStore(String),

    #[error("context store failure: {0}")]
    Backend(String),
}

/// Key/value access to a flow or global context, addressed by store name.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Reads `key` (a dotted path) from `store`.
    async fn get(&self, key: &str, store: &str) -> Result<Option<Value>, StoreError>;

    /// Writes `key` (a dotted path) in `store`.
    async fn set(&self, key: &str, value: Value, store: &str) -> Result<(), StoreError>;

    fn name(&self) -> &'static str;
}

impl fmt::Debug for dyn ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("impl", &self.name())
            .finish()
    }
}

/// Process-local store. Each named store is one JSON object guarded by its
/// map shard, so every `get`/`set` is atomic on its own.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    stores: DashMap<String, Value>,
    allowed: Option<HashSet<String>>,
}

impl InMemoryStore {
    /// Accepts any store name.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Only the listed store names are accepted; others fail with
    /// [`StoreError::UnknownStore`].
    pub fn with_stores<I, S>(names: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            stores: DashMap::new(),
            allowed: Some(names.into_iter().map(Into::into).collect()),
        })
    }

    /// Seeds a top-level value without going through the async interface.
    pub fn insert(&self, store: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.check(store)?;
        let mut root = self
            .stores
            .entry(store.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        set_path(root.value_mut(), key, value);
        Ok(())
    }

    fn check(&self, store: &str) -> Result<(), StoreError> {
        match &self.allowed {
            Some(allowed) if !allowed.contains(store) => {
                Err(StoreError::UnknownStore(store.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ContextStore for InMemoryStore {
    async fn get(&self, key: &str, store: &str) -> Result<Option<Value>, StoreError> {
        self.check(store)?;
        Ok(self
            .stores
            .get(store)
            .and_then(|root| get_path(root.value(), key).cloned()))
    }

    async fn set(&self, key: &str, value: Value, store: &str) -> Result<(), StoreError> {
        self.insert(store, key, value)
    }

    fn name(&self) -> &'static str {
        "InMemoryStore"
    }
}

/// The flow and global contexts visible to one node.
#[derive(Clone, Debug)]
pub struct NodeContext {
    flow: Arc<dyn ContextStore>,
    global: Arc<dyn ContextStore>,
}

impl NodeContext {
    pub fn new(flow: Arc<dyn ContextStore>, global: Arc<dyn ContextStore>) -> Self {
        Self { flow, global }
    }

    /// Fresh, empty in-memory flow and global contexts.
    pub fn in_memory() -> Self {
        Self::new(InMemoryStore::new(), InMemoryStore::new())
    }

    pub fn store(&self, scope: Scope) -> &Arc<dyn ContextStore> {
        match scope {
            Scope::Flow => &self.flow,
            Scope::Global => &self.global,
        }
    }
}

/// A context property name, optionally prefixed with a store:
/// `#:(file)::device.serial`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextKey {
    pub store: Option<String>,
    pub key: String,
}

impl ContextKey {
    pub fn parse(raw: &str) -> Self {
        match CONTEXT_KEY.captures(raw) {
            Some(caps) => Self {
                store: Some(caps[1].to_string()),
                key: caps[2].to_string(),
            },
            None => Self {
                store: None,
                key: raw.to_string(),
            },
        }
    }

    pub fn store_or_default(&self) -> &str {
        self.store.as_deref().unwrap_or(DEFAULT_STORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_store_get_set() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("site", DEFAULT_STORE).await.unwrap(), None);

        store.set("site", json!("north"), DEFAULT_STORE).await.unwrap();
        assert_eq!(store.get("site", DEFAULT_STORE).await.unwrap(), Some(json!("north")));

        // stores are separate namespaces
        assert_eq!(store.get("site", "file").await.unwrap(), None);
        assert_eq!(store.name(), "InMemoryStore");
    }

    #[tokio::test]
    async fn test_nested_keys() {
        let store = InMemoryStore::new();
        store.set("device.serial", json!(7), "file").await.unwrap();
        assert_eq!(store.get("device", "file").await.unwrap(), Some(json!({"serial": 7})));
        assert_eq!(store.get("device.serial", "file").await.unwrap(), Some(json!(7)));
    }

    #[tokio::test]
    async fn test_restricted_stores() {
        let store = InMemoryStore::with_stores(["default"]);
        store.set("a", json!(1), "default").await.unwrap();
        assert_eq!(
            store.set("a", json!(1), "file").await,
            Err(StoreError::UnknownStore("file".into()))
        );
        assert!(store.get("a", "file").await.is_err());
    }

    #[tokio::test]
    async fn test_node_context_scopes() {
        let ctx = NodeContext::in_memory();
        ctx.store(Scope::Flow).set("x", json!(1), DEFAULT_STORE).await.unwrap();
        assert_eq!(ctx.store(Scope::Global).get("x", DEFAULT_STORE).await.unwrap(), None);
        assert_eq!(ctx.store(Scope::Flow).get("x", DEFAULT_STORE).await.unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_context_key_parse() {
        let plain = ContextKey::parse("result");
        assert_eq!(plain.store, None);
        assert_eq!(plain.key, "result");
        assert_eq!(plain.store_or_default(), "default");

        let stored = ContextKey::parse("#:(file)::device.serial");
        assert_eq!(stored.store.as_deref(), Some("file"));
        assert_eq!(stored.key, "device.serial");
        assert_eq!(stored.store_or_default(), "file");
    }

    #[test]
    fn test_scope_display_and_serde() {
        assert_eq!(Scope::Flow.to_string(), "flow");
        assert_eq!(serde_json::to_value(Scope::Global).unwrap(), json!("global"));
    }
}

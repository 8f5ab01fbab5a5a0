//! Variable resolution for template rendering.
//!
//! A [`MergedContext`] answers lookups from two sources: the message scope
//! (the in-flight message plus any pushed section views) and a cache of
//! context-store values resolved before rendering started. Message fields
//! always win.
use std::collections::HashMap;

use serde_json::Value;

use super::reference::StoreReference;
use crate::util::get_path;

/// Something a template variable name can be resolved against.
pub trait Lookup {
    fn resolve(&self, name: &str) -> Option<Value>;
}

/// A chain of views: the innermost section view first, the message last.
#[derive(Debug, Clone, Copy)]
pub struct MessageScope<'a> {
    view: &'a Value,
    parent: Option<&'a MessageScope<'a>>,
}

impl<'a> MessageScope<'a> {
    pub fn new(view: &'a Value) -> Self {
        Self { view, parent: None }
    }

    /// A hit is the nearest view holding the full dotted path; `.` is the
    /// current view itself.
    pub fn find(&self, name: &str) -> Option<&'a Value> {
        if name == "." {
            return Some(self.view);
        }
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(value) = get_path(current.view, name) {
                return Some(value);
            }
            scope = current.parent;
        }
        None
    }
}

impl Lookup for MessageScope<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.find(name).cloned()
    }
}

/// Store values keyed by the raw variable name (`flow[file].serial`), filled
/// once per message before rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedTokenCache {
    values: HashMap<String, Value>,
}

impl ResolvedTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Lookup for ResolvedTokenCache {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct MergedContext<'a> {
    scope: MessageScope<'a>,
    cache: &'a ResolvedTokenCache,
    escape_strings: bool,
}

impl<'a> MergedContext<'a> {
    pub fn new(message: &'a Value, cache: &'a ResolvedTokenCache, escape_strings: bool) -> Self {
        Self {
            scope: MessageScope::new(message),
            cache,
            escape_strings,
        }
    }

    /// Child context for a section body. Escaping is never inherited.
    pub fn push<'b>(&'b self, view: &'b Value) -> MergedContext<'b> {
        MergedContext {
            scope: MessageScope {
                view,
                parent: Some(&self.scope),
            },
            cache: self.cache,
            escape_strings: false,
        }
    }
}

impl Lookup for MergedContext<'_> {
    /// Returns `None` only for a store reference with no cached value;
    /// any other unknown name resolves to `""`.
    fn resolve(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.scope.find(name) {
            return Some(match value {
                Value::String(s) if self.escape_strings => Value::String(escape_control_chars(s)),
                other => other.clone(),
            });
        }
        match StoreReference::parse(name) {
            Some(_) => self.cache.resolve(name),
            None => Some(Value::String(String::new())),
        }
    }
}

/// Escapes backslash, newline, tab, carriage return, form feed and backspace
/// so the rendered text can sit inside a JSON string literal.
pub fn escape_control_chars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{0C}' => out.push_str("\\f"),
            '\u{08}' => out.push_str("\\b"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> ResolvedTokenCache {
        let mut cache = ResolvedTokenCache::new();
        cache.insert("flow.site", json!("plant-7"));
        cache.insert("global[file].serial", json!(42));
        cache
    }

    #[test]
    fn test_message_fields_first() {
        let msg = json!({"payload": {"temp": 21}, "flow": {"site": "from-msg"}});
        let cache = cache();
        let ctx = MergedContext::new(&msg, &cache, false);

        assert_eq!(ctx.resolve("payload.temp"), Some(json!(21)));
        assert_eq!(ctx.resolve("flow.site"), Some(json!("from-msg")));
        assert_eq!(ctx.resolve("global[file].serial"), Some(json!(42)));
    }

    #[test]
    fn test_store_fallback_and_empty_default() {
        let msg = json!({"payload": 1});
        let cache = cache();
        let ctx = MergedContext::new(&msg, &cache, false);

        assert_eq!(ctx.resolve("flow.site"), Some(json!("plant-7")));
        // store reference never resolved: absent, not ""
        assert_eq!(ctx.resolve("flow.unknown"), None);
        assert_eq!(ctx.resolve("nothing.here"), Some(json!("")));
        assert_eq!(ctx.resolve("payload.deeper"), Some(json!("")));
    }

    #[test]
    fn test_null_message_value_is_a_hit() {
        let msg = json!({"flow": {"site": null}});
        let cache = cache();
        let ctx = MergedContext::new(&msg, &cache, false);
        assert_eq!(ctx.resolve("flow.site"), Some(Value::Null));
    }

    #[test]
    fn test_escaping_only_at_top_level() {
        let msg = json!({"name": "a\\b\nc", "items": [{"label": "x\ty"}]});
        let cache = ResolvedTokenCache::new();
        let ctx = MergedContext::new(&msg, &cache, true);
        assert_eq!(ctx.resolve("name"), Some(json!("a\\\\b\\nc")));

        let item = json!({"label": "x\ty"});
        let child = ctx.push(&item);
        assert_eq!(child.resolve("label"), Some(json!("x\ty")));
        // parent fields are visible, unescaped, from the child
        assert_eq!(child.resolve("name"), Some(json!("a\\b\nc")));
    }

    #[test]
    fn test_store_values_are_not_escaped() {
        let msg = json!({});
        let mut cache = ResolvedTokenCache::new();
        cache.insert("flow.note", json!("a\nb"));
        let ctx = MergedContext::new(&msg, &cache, true);
        assert_eq!(ctx.resolve("flow.note"), Some(json!("a\nb")));
    }

    #[test]
    fn test_push_chain_and_dot() {
        let msg = json!({"site": "outer", "device": {"id": "d1"}});
        let cache = ResolvedTokenCache::new();
        let ctx = MergedContext::new(&msg, &cache, false);
        let view = json!({"id": "inner"});
        let child = ctx.push(&view);

        assert_eq!(child.resolve("id"), Some(json!("inner")));
        assert_eq!(child.resolve("site"), Some(json!("outer")));
        assert_eq!(child.resolve("device.id"), Some(json!("d1")));
        assert_eq!(child.resolve("."), Some(json!({"id": "inner"})));
    }

    #[test]
    fn test_escape_is_single_pass() {
        assert_eq!(escape_control_chars("\\"), "\\\\");
        assert_eq!(escape_control_chars("a\nb\tc"), "a\\nb\\tc");
        assert_eq!(escape_control_chars("\r\u{0C}\u{08}"), "\\r\\f\\b");
        // an escaped newline must not have its new backslash doubled
        assert_eq!(escape_control_chars("\\\n"), "\\\\\\n");
        assert_eq!(escape_control_chars("plain"), "plain");
    }
}

//! Double-brace identifier templates.
//!
//! Supported syntax:
//! - `{{name}}` HTML-escaped variable, `{{{name}}}` / `{{& name}}` raw variable
//! - `{{#name}}...{{/name}}` sections (lists iterate, objects push a scope)
//! - `{{^name}}...{{/name}}` inverted sections
//! - `{{! comment }}`
//!
//! Names are dotted message paths (`payload.device.serial`) or context store
//! references (`flow.site`, `flow[file].site`, `global.serial`). Store values
//! must be resolved into a [`ResolvedTokenCache`] before rendering.
use std::collections::BTreeSet;

pub mod error;
pub mod lookup;
pub mod parser;
pub mod reference;
pub mod render;

pub use error::TemplateError;
pub use lookup::{escape_control_chars, Lookup, MergedContext, MessageScope, ResolvedTokenCache};
pub use parser::Token;
pub use reference::{collect_references, StoreReference};

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    tokens: Vec<Token>,
}

impl Template {
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            source: source.to_string(),
            tokens: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every variable and section name used anywhere in the template.
    pub fn references(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_references(&self.tokens, &mut names);
        names
    }

    /// The subset of [`Template::references`] that address a context store.
    pub fn store_references(&self) -> Vec<(String, StoreReference)> {
        self.references()
            .into_iter()
            .filter_map(|name| StoreReference::parse(&name).map(|reference| (name, reference)))
            .collect()
    }

    pub fn render(&self, ctx: &MergedContext<'_>) -> String {
        render::render(&self.tokens, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Scope;
    use serde_json::json;

    #[test]
    fn test_compile_and_render() {
        let template = Template::compile("{{payload.device}}-{{flow[file].site}}").unwrap();
        assert_eq!(template.source(), "{{payload.device}}-{{flow[file].site}}");

        let mut cache = ResolvedTokenCache::new();
        cache.insert("flow[file].site", json!("north"));
        let msg = json!({"payload": {"device": "pump"}});
        assert_eq!(template.render(&MergedContext::new(&msg, &cache, false)), "pump-north");
    }

    #[test]
    fn test_store_references() {
        let template = Template::compile("{{payload}}{{#global.list}}{{flow.x}}{{/global.list}}").unwrap();
        let refs = template.store_references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].0, "flow.x");
        assert_eq!(refs[0].1.scope, Scope::Flow);
        assert_eq!(refs[1].0, "global.list");
        assert_eq!(refs[1].1.scope, Scope::Global);
    }

    #[test]
    fn test_compile_error() {
        assert!(matches!(
            Template::compile("{{#open}}"),
            Err(TemplateError::UnclosedSection(_))
        ));
    }
}

//! Recognises template variable names that address a flow or global context
//! store instead of a message field.
use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::parser::Token;
use crate::context::{Scope, DEFAULT_STORE};

static STORE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(flow|global)(\[(\w+)\])?\.(.+)$").expect("valid store reference regex")
});

/// A parsed `flow[store].field` / `global.field` variable name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreReference {
    pub scope: Scope,
    pub store: String,
    /// Field path inside the store, dots kept verbatim.
    pub field: String,
}

impl StoreReference {
    /// Returns `None` for names that should be treated as message fields.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = STORE_REFERENCE.captures(name)?;
        let scope = match &caps[1] {
            "flow" => Scope::Flow,
            _ => Scope::Global,
        };
        let store = caps
            .get(3)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STORE)
            .to_string();
        Some(Self {
            scope,
            store,
            field: caps[4].to_string(),
        })
    }
}

impl fmt::Display for StoreReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}].{}", self.scope, self.store, self.field)
    }
}

/// Collects every variable and section name in a token tree, recursing into
/// sections. Literal text, comments and partials are skipped.
pub fn collect_references(tokens: &[Token], names: &mut BTreeSet<String>) {
    for token in tokens {
        match token {
            Token::Variable(name) | Token::Unescaped(name) => {
                names.insert(name.clone());
            }
            Token::Section { name, children } | Token::Inverted { name, children } => {
                names.insert(name.clone());
                collect_references(children, names);
            }
            Token::Text(_) | Token::Comment(_) | Token::Partial(_) => {}
        }
    }
}

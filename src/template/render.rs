use handlebars::html_escape;
use serde_json::Value;

use super::lookup::{Lookup, MergedContext};
use super::parser::Token;

pub fn render(tokens: &[Token], ctx: &MergedContext<'_>) -> String {
    let mut out = String::new();
    render_into(tokens, ctx, &mut out);
    out
}

fn render_into(tokens: &[Token], ctx: &MergedContext<'_>, out: &mut String) {
    for token in tokens {
        match token {
            Token::Text(text) => out.push_str(text),
            Token::Variable(name) => {
                if let Some(value) = ctx.resolve(name) {
                    out.push_str(&html_escape(&display(&value)));
                }
            }
            Token::Unescaped(name) => {
                if let Some(value) = ctx.resolve(name) {
                    out.push_str(&display(&value));
                }
            }
            Token::Section { name, children } => {
                let value = ctx.resolve(name).unwrap_or(Value::Null);
                if !is_truthy(&value) {
                    continue;
                }
                match &value {
                    Value::Array(items) => {
                        for item in items {
                            render_into(children, &ctx.push(item), out);
                        }
                    }
                    Value::Bool(true) => render_into(children, ctx, out),
                    other => render_into(children, &ctx.push(other), out),
                }
            }
            Token::Inverted { name, children } => {
                let value = ctx.resolve(name).unwrap_or(Value::Null);
                let empty_list = matches!(&value, Value::Array(items) if items.is_empty());
                if !is_truthy(&value) || empty_list {
                    render_into(children, ctx, out);
                }
            }
            Token::Comment(_) | Token::Partial(_) => {}
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form of a resolved value. Whole floats print without a fraction;
/// arrays and objects print as compact JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
            _ => n.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

use super::error::{Result, TemplateError};

/// One node of a compiled double-brace template.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    /// `{{name}}`, HTML-escaped on output.
    Variable(String),
    /// `{{{name}}}` or `{{& name}}`.
    Unescaped(String),
    /// `{{#name}}...{{/name}}`
    Section { name: String, children: Vec<Token> },
    /// `{{^name}}...{{/name}}`
    Inverted { name: String, children: Vec<Token> },
    Comment(String),
    /// `{{> name}}`; no partials are registered, so these render nothing.
    Partial(String),
}

struct OpenSection {
    name: String,
    inverted: bool,
    outer: Vec<Token>,
}

pub fn parse(source: &str) -> Result<Vec<Token>> {
    let mut stack: Vec<OpenSection> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut rest = source;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        push_text(&mut current, &rest[..start]);
        let tag_at = offset + start;
        let after = &rest[start + 2..];

        let (raw, tag_len, triple) = match after.strip_prefix('{') {
            Some(inner) => {
                let end = inner.find("}}}").ok_or(TemplateError::UnclosedTag(tag_at))?;
                (&inner[..end], 3 + end + 3, true)
            }
            None => {
                let end = after.find("}}").ok_or(TemplateError::UnclosedTag(tag_at))?;
                (&after[..end], 2 + end + 2, false)
            }
        };
        rest = &rest[start + tag_len..];
        offset += start + tag_len;

        let content = raw.trim();
        if triple {
            current.push(Token::Unescaped(tag_name(content, tag_at)?));
            continue;
        }

        let mut chars = content.chars();
        match chars.next() {
            None => return Err(TemplateError::EmptyTag(tag_at)),
            Some(sigil @ ('#' | '^')) => stack.push(OpenSection {
                name: tag_name(chars.as_str(), tag_at)?,
                inverted: sigil == '^',
                outer: std::mem::take(&mut current),
            }),
            Some('/') => {
                let name = tag_name(chars.as_str(), tag_at)?;
                let open = stack
                    .pop()
                    .ok_or_else(|| TemplateError::UnopenedSection(name.clone()))?;
                if open.name != name {
                    return Err(TemplateError::MismatchedSection {
                        expected: open.name,
                        found: name,
                    });
                }
                let children = std::mem::replace(&mut current, open.outer);
                current.push(if open.inverted {
                    Token::Inverted { name, children }
                } else {
                    Token::Section { name, children }
                });
            }
            Some('!') => current.push(Token::Comment(chars.as_str().trim().to_string())),
            Some('&') => current.push(Token::Unescaped(tag_name(chars.as_str(), tag_at)?)),
            Some('>') => current.push(Token::Partial(tag_name(chars.as_str(), tag_at)?)),
            Some(_) => current.push(Token::Variable(content.to_string())),
        }
    }
    push_text(&mut current, rest);

    match stack.pop() {
        Some(open) => Err(TemplateError::UnclosedSection(open.name)),
        None => Ok(current),
    }
}

fn tag_name(raw: &str, at: usize) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        Err(TemplateError::EmptyTag(at))
    } else {
        Ok(name.to_string())
    }
}

fn push_text(tokens: &mut Vec<Token>, text: &str) {
    if !text.is_empty() {
        tokens.push(Token::Text(text.to_string()));
    }
}

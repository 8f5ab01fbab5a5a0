use thiserror::Error;

/// Errors raised while compiling a double-brace template.
///
/// Rendering itself never fails; every lookup falls back to an empty value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("unclosed tag starting at byte {0}")]
    UnclosedTag(usize),

    #[error("empty tag at byte {0}")]
    EmptyTag(usize),

    #[error("unclosed section `{0}`")]
    UnclosedSection(String),

    #[error("unopened section `{0}`")]
    UnopenedSection(String),

    #[error("section `{expected}` closed by `{found}`")]
    MismatchedSection { expected: String, found: String },
}

pub type Result<T> = std::result::Result<T, TemplateError>;

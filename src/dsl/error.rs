//! Erro de parsing com contexto de offset em bytes.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("parse error at byte {offset}: {reason} (near: {snippet:?})")]
pub struct ParseError {
    pub offset: usize,
    pub reason: String,
    pub snippet: String,
}

impl ParseError {
    pub fn new(offset: usize, reason: impl Into<String>, source: &str) -> Self {
        let start = offset.min(source.len());
        let end = (start + 24).min(source.len());
        Self {
            offset,
            reason: reason.into(),
            snippet: source[start..end].to_string(),
        }
    }
}

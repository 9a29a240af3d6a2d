//! # Módulo DSL: parser de arquivos `.flow`
//!
//! Ponto de entrada público: [`parse`]. Consulte `parser.rs` para a
//! gramática implementada e `ast.rs` para os tipos produzidos.

mod ast;
mod error;
mod parser;

pub use ast::{Backoff, Entrypoint, Flow, RetryConfig, Step, RETURN_STEP_ID};
pub use error::ParseError;
pub use parser::parse;

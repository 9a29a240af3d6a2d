//! # Módulo de Erros de Fluxo (FlowError)
//!
//! Define o tipo de erro estruturado que percorre todo o motor de execução:
//! do corpo de um step (via `raise(...)`), passando pelo loop de retry,
//! pelo fallback, pelo handler `on_error`, até a compensação.
//!
//! ## Para todos entenderem:
//!
//! Um `FlowError` não é só uma mensagem de texto. Ele carrega:
//! - **type**: a "categoria" do erro (transiente, permanente, timeout)
//! - **code**: um código curto que identifica a causa (ex: "DEADLINE_EXCEEDED")
//! - **message**: texto legível para humanos
//! - **step**: em qual step o erro ocorreu (vazio para erros de nível de fluxo)
//! - **retries**: quantas tentativas já foram observadas quando o erro foi reportado
//!
//! O motor de retry decide "tento de novo?" olhando para `type` e `code`,
//! nunca para o texto de `message`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Categoria de um `FlowError`.
///
/// - `Transient`: passageiro, elegível a retry por padrão.
/// - `Permanent`: não deve ser tentado de novo, a menos que `retry.when` diga o contrário.
/// - `Timeout`: originado de um deadline de contexto ou cancelamento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowErrorType {
    Transient,
    Permanent,
    Timeout,
}

impl fmt::Display for FlowErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Códigos de erro bem conhecidos, gerados internamente pelo motor.
/// Códigos escolhidos pelo autor do flow via `raise(code, ...)` são livres.
pub mod codes {
    pub const RAISE: &str = "RAISE";
    pub const RUNTIME_ERROR: &str = "RUNTIME_ERROR";
    pub const DEADLINE_EXCEEDED: &str = "DEADLINE_EXCEEDED";
    pub const CONTEXT_CANCELLED: &str = "CONTEXT_CANCELLED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Erro estruturado de falha de execução de um flow ou de um step.
///
/// Implementa `std::error::Error` para poder atravessar `anyhow`/`?`
/// em qualquer ponto do crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowError {
    #[serde(rename = "type")]
    pub error_type: FlowErrorType,
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub retries: u32,
    /// Causa original, quando disponível (não serializada; apenas para logs/debug).
    #[serde(skip)]
    pub cause: Option<String>,
}

impl FlowError {
    pub fn new(error_type: FlowErrorType, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type,
            code: code.into(),
            message: message.into(),
            step: String::new(),
            retries: 0,
            cause: None,
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FlowErrorType::Permanent, code, message)
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FlowErrorType::Transient, code, message)
    }

    pub fn timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FlowErrorType::Timeout, code, message)
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = step.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Serializa o erro para o envelope documentado em §6: um mapa JSON
    /// `{type, code, message, step, retries}`, usado tanto para `raise()`
    /// quanto para a variável `error` injetada no handler `on_error`.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".into(), Value::String(self.error_type.to_string()));
        map.insert("code".into(), Value::String(self.code.clone()));
        map.insert("message".into(), Value::String(self.message.clone()));
        map.insert("step".into(), Value::String(self.step.clone()));
        map.insert("retries".into(), Value::from(self.retries));
        map
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.step.is_empty() {
            write!(f, "[{}:{}] {}", self.error_type, self.code, self.message)
        } else {
            write!(
                f,
                "[{}:{}] step '{}': {}",
                self.error_type, self.code, self.step, self.message
            )
        }
    }
}

impl std::error::Error for FlowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_step() {
        let err = FlowError::permanent("X", "boom").with_step("a");
        let rendered = err.to_string();
        assert!(rendered.contains("permanent"));
        assert!(rendered.contains("step 'a'"));
    }

    #[test]
    fn test_to_map_roundtrip_fields() {
        let err = FlowError::transient("TIMEOUT_LIKE", "slow").with_retries(2);
        let map = err.to_map();
        assert_eq!(map.get("type").unwrap(), "transient");
        assert_eq!(map.get("code").unwrap(), "TIMEOUT_LIKE");
        assert_eq!(map.get("retries").unwrap(), 2);
    }
}

//! Tipos do AST produzido pelo parser de `.flow`: `Flow`, `Step`, `RetryConfig`.
//!
//! São dados puros — nenhuma lógica de execução vive aqui. A execução
//! consulta estes tipos via `crate::flow_executor` e `crate::step_executor`.

use serde_json::Value;
use std::collections::HashMap;

/// Definição compilada e imutável de um flow, construída uma única vez no load.
#[derive(Debug, Clone)]
pub struct Flow {
    /// Derivado do nome do arquivo fonte, sem extensão.
    pub id: String,
    pub entrypoint: Entrypoint,
    /// 0 = sem limite.
    pub timeout_ms: u64,
    pub properties: HashMap<String, Value>,
    pub steps: Vec<Step>,
    pub on_error_body: Option<String>,
    /// Corpo de `return <expression>`, executado como um step terminal
    /// sintético de id `__return`.
    pub return_body: Option<String>,
}

/// Id reservado para o step sintético gerado a partir do bloco `return`.
pub const RETURN_STEP_ID: &str = "__return";

impl Flow {
    /// Procura um step pelo id, incluindo o sintético `__return` se presente.
    pub fn find_step(&self, id: &str) -> Option<&Step> {
        if id == RETURN_STEP_ID {
            return None; // o step de retorno não é endereçável como os demais
        }
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Tipo e configuração de entrada de um flow (`entrypoint.<TYPE> { ... }`).
#[derive(Debug, Clone)]
pub struct Entrypoint {
    pub kind: String,
    pub config: HashMap<String, Value>,
}

/// Uma unidade de execução dentro de um flow.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    /// Fonte com script, opaca para o parser.
    pub body: String,
    /// Expressão de condição opcional; vazio significa "sempre executa".
    pub condition: Option<String>,
    /// 0 = sem limite (usa apenas o deadline do flow, se houver).
    pub timeout_ms: u64,
    pub retry: Option<RetryConfig>,
    pub fallback_body: Option<String>,
    pub compensate_body: Option<String>,
}

/// Estratégia de backoff entre tentativas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Linear,
    Exponential,
}

impl Backoff {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(Self::None),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Política de retry de um step.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total de tentativas, incluindo a primeira. Sempre >= 1.
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: Backoff,
    /// 0 = sem teto.
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Expressão opcional; só tenta de novo se ela for verdadeira,
    /// avaliada com `error` no ambiente.
    pub when: Option<String>,
    /// Códigos de erro que nunca são tentados de novo.
    pub non_retryable: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
            backoff: Backoff::None,
            max_delay_ms: 0,
            jitter: false,
            when: None,
            non_retryable: Vec::new(),
        }
    }
}

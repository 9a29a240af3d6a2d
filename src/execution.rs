//! # Módulo de Execution: o registro de runtime de uma requisição
//!
//! Cada requisição recebida pelo front-end HTTP (fora do escopo deste
//! núcleo) vira uma `Execution`: dono exclusivo do seu `ValueStore`, do
//! seu `response_descriptor` e do seu `compensation_log`, do início ao
//! fim do fluxo. Nada aqui é compartilhado entre execuções concorrentes
//! — cada uma cuida da sua própria vida, só o `Container` (plugins) é
//! compartilhado, e é somente-leitura.

use crate::container::Container;
use crate::store::ValueStore;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Em qual corpo um step bem-sucedido rodou: o `main` ou o `fallback`.
/// Registrado no log de compensação para saber, durante o unwind, de
/// onde veio o efeito colateral a desfazer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationPath {
    Main,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct CompensationEntry {
    pub step_id: String,
    pub path: CompensationPath,
}

/// A resposta declarativa montada por uma chamada `response.<handler>(...)`.
/// Consumida pelo front-end HTTP externo ao final do flow.
#[derive(Debug, Clone)]
pub struct ResponseDescriptor {
    pub handler_name: String,
    pub args: Value,
}

/// Deadline e cancelamento compartilháveis entre o flow e seus steps.
///
/// Um contexto de step é filho do contexto de flow: o deadline efetivo é
/// o menor dos dois, e o cancelamento se propaga (é o mesmo `Arc`).
#[derive(Clone)]
pub struct ExecutionContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl ExecutionContext {
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout(timeout_ms: u64) -> Self {
        let mut ctx = Self::unbounded();
        if timeout_ms > 0 {
            ctx.deadline = Some(Instant::now() + Duration::from_millis(timeout_ms));
        }
        ctx
    }

    /// Deriva um contexto filho com seu próprio deadline de `timeout_ms`
    /// (0 = sem limite próprio), limitado superiormente pelo deadline
    /// deste contexto (o do flow), e compartilhando o mesmo sinal de
    /// cancelamento.
    pub fn child_with_timeout(&self, timeout_ms: u64) -> Self {
        let own_deadline = if timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(timeout_ms))
        } else {
            None
        };
        let deadline = match (own_deadline, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        Self {
            deadline,
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_deadline_exceeded()
    }

    /// Quanto tempo falta até o deadline, se houver um.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// O registro de runtime de uma execução de flow.
pub struct Execution {
    pub store: ValueStore,
    pub container: Arc<Container>,
    pub response_descriptor: Option<ResponseDescriptor>,
    pub compensation_log: Vec<CompensationEntry>,
    pub ctx: ExecutionContext,
    pub execution_id: String,
}

impl Execution {
    pub fn new(container: Arc<Container>, ctx: ExecutionContext, execution_id: impl Into<String>) -> Self {
        Self {
            store: ValueStore::new(),
            container,
            response_descriptor: None,
            compensation_log: Vec::new(),
            ctx,
            execution_id: execution_id.into(),
        }
    }

    pub fn record_success(&mut self, step_id: impl Into<String>, path: CompensationPath) {
        self.compensation_log.push(CompensationEntry {
            step_id: step_id.into(),
            path,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_context_bounded_by_parent_deadline() {
        let parent = ExecutionContext::with_timeout(50);
        let child = parent.child_with_timeout(5_000);
        // O filho pediu 5s mas o pai só tem 50ms — deve respeitar o menor.
        assert!(child.remaining().unwrap() <= Duration::from_millis(60));
    }

    #[test]
    fn test_cancellation_propagates_to_children() {
        let parent = ExecutionContext::unbounded();
        let child = parent.child_with_timeout(0);
        parent.cancel();
        assert!(child.is_cancelled());
    }
}

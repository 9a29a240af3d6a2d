//! # Módulo de Expression Evaluator
//!
//! Avalia expressões de script (`condition`, `retry.when`) contra o
//! ambiente atual. Diferente do Step Executor: nenhum plugin, nenhum
//! `raise`, nenhum helper — só o value store, convertido pelas mesmas
//! regras do bridge, como globals.

use crate::bridge::{self, convert::from_dynamic};
use crate::errors::FlowError;
use crate::execution::Execution;
use serde_json::Value;

/// Avalia `expression` e devolve o valor nativo resultante.
///
/// Erros de avaliação (sintaxe inválida, variável ausente, etc.) viram
/// `FlowError` do tipo `permanent`, como qualquer outro erro de condição
/// (§7).
pub fn evaluate(execution: &Execution, expression: &str) -> Result<Value, FlowError> {
    let mut env = bridge::build_for_expression(execution);
    let result = tokio_block_eval(&mut env, expression);
    result
        .map(|dynamic| from_dynamic(&dynamic))
        .map_err(|err| FlowError::permanent("CONDITION_ERROR", err.to_string()))
}

/// Como `evaluate`, mas injetando variáveis extras no escopo — usado por
/// `retry.when`, que avalia com `error` disponível (§4.5).
pub fn evaluate_with_extra(
    execution: &Execution,
    expression: &str,
    extra_globals: Vec<(String, Value)>,
) -> Result<Value, FlowError> {
    let mut env = bridge::build_for_expression_with_extra(execution, extra_globals);
    let result = tokio_block_eval(&mut env, expression);
    result
        .map(|dynamic| from_dynamic(&dynamic))
        .map_err(|err| FlowError::permanent("CONDITION_ERROR", err.to_string()))
}

fn tokio_block_eval(
    env: &mut bridge::StepEnv,
    expression: &str,
) -> Result<rhai::Dynamic, Box<rhai::EvalAltResult>> {
    env.engine.eval_with_scope(&mut env.scope, expression)
}

/// Semântica de "falsidade" usada por condições e `retry.when` (§4.5,
/// passo 1): `false`, `nil`, zero numérico, string vazia, mapa/sequência
/// vazios.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::execution::ExecutionContext;
    use std::sync::Arc;

    fn new_execution() -> Execution {
        Execution::new(Arc::new(Container::new()), ExecutionContext::unbounded(), "test-exec")
    }

    #[test]
    fn test_evaluates_simple_comparison() {
        let mut execution = new_execution();
        execution.store.set("a", Value::from(1));
        let result = evaluate(&execution, "a == 2").expect("evaluates");
        assert!(is_falsy(&result));
    }

    #[test]
    fn test_truthy_equality() {
        let mut execution = new_execution();
        execution.store.set("a", Value::from(2));
        let result = evaluate(&execution, "a == 2").expect("evaluates");
        assert!(!is_falsy(&result));
    }

    #[test]
    fn test_falsy_rules() {
        assert!(is_falsy(&Value::Null));
        assert!(is_falsy(&Value::Bool(false)));
        assert!(is_falsy(&Value::from(0)));
        assert!(is_falsy(&Value::String(String::new())));
        assert!(is_falsy(&Value::Array(vec![])));
        assert!(!is_falsy(&Value::from(1)));
        assert!(!is_falsy(&Value::String("x".into())));
    }
}

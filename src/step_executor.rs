//! # Módulo de Step Executor
//!
//! Implementa o contrato `ExecuteStep(execution, step) -> error` (§4.4):
//! monta o ambiente via `crate::bridge`, invoca a VM sobre o corpo do
//! step, classifica o erro quando há um, e deposita o resultado no value
//! store quando a invocação é bem-sucedida.
//!
//! Os dois pontos de entrada auxiliares (`execute_on_error_handler`,
//! `execute_compensation`) reusam a mesma montagem de ambiente, só
//! variando as variáveis extras injetadas.

use crate::bridge::{self, extract_flow_error};
use crate::dsl::Step;
use crate::errors::{codes, FlowError, FlowErrorType};
use crate::execution::Execution;
use rhai::Dynamic;
use serde_json::Value;

/// Executa o corpo principal de um step. Retorna `Ok(())` em sucesso
/// (já tendo gravado o resultado no value store, se aplicável) ou o
/// `FlowError` classificado em caso de falha.
#[tracing::instrument(skip(execution, step), fields(step_id = %step.id))]
pub async fn execute_step(execution: &mut Execution, step: &Step) -> Result<(), FlowError> {
    if step.body.trim().is_empty() {
        return Ok(());
    }
    tracing::info!(step_id = %step.id, "executing step body");
    run_body(execution, &step.body, Vec::new(), &step.id).await
}

/// Injeta `error = flow_error.to_map()` e roda `body` (o handler
/// `on_error` do flow).
#[tracing::instrument(skip(execution, body, flow_error), fields(error_code = %flow_error.code))]
pub async fn execute_on_error_handler(
    execution: &mut Execution,
    body: &str,
    flow_error: &FlowError,
) -> Result<(), FlowError> {
    let extra = vec![("error".to_string(), Value::Object(flow_error.to_map()))];
    run_body(execution, body, extra, "").await
}

/// Executa `step.fallback_body` com a mesma montagem de ambiente e
/// depósito de resultado do corpo principal (§4.5, passo 3).
#[tracing::instrument(skip(execution, step), fields(step_id = %step.id))]
pub async fn execute_fallback(execution: &mut Execution, step: &Step) -> Result<(), FlowError> {
    let body = step
        .fallback_body
        .as_deref()
        .expect("execute_fallback called without a fallback_body");
    tracing::info!(step_id = %step.id, "executing fallback body");
    run_body(execution, body, Vec::new(), &step.id).await
}

/// Injeta `compensation = {step, path}` e roda `body` (a compensação de
/// um step específico).
#[tracing::instrument(skip(execution, body), fields(step_id = %step_id, path = %path))]
pub async fn execute_compensation(
    execution: &mut Execution,
    body: &str,
    step_id: &str,
    path: &str,
) -> Result<(), FlowError> {
    let extra = vec![(
        "compensation".to_string(),
        serde_json::json!({ "step": step_id, "path": path }),
    )];
    run_body(execution, body, extra, step_id).await
}

async fn run_body(
    execution: &mut Execution,
    body: &str,
    extra_globals: Vec<(String, Value)>,
    step_id: &str,
) -> Result<(), FlowError> {
    let mut env = bridge::build_for_step(execution, extra_globals);
    let body = body.to_string();

    // `Engine::eval_with_scope` é síncrona e pode bloquear em I/O de
    // plugin; isolamos o worker Tokio com `block_in_place` em vez de
    // travar o executor assíncrono.
    let eval_result: Result<Dynamic, Box<rhai::EvalAltResult>> =
        tokio::task::block_in_place(|| env.engine.eval_with_scope(&mut env.scope, &body));

    let response_descriptor = env.take_response();
    if let Some(descriptor) = response_descriptor {
        execution.response_descriptor = Some(descriptor);
    }

    match eval_result {
        Ok(result) => {
            if execution.response_descriptor.is_none() {
                let value = bridge::convert::from_dynamic(&result);
                if !value.is_null() {
                    deposit(execution, step_id, value);
                }
            }
            Ok(())
        }
        Err(err) => Err(classify_error(*err, step_id, execution.ctx.is_cancelled())),
    }
}

fn deposit(execution: &mut Execution, step_id: &str, value: Value) {
    if step_id.is_empty() {
        return;
    }
    if value.is_object() {
        execution.store.set_nested(step_id, value);
    } else {
        execution.store.set(step_id, value);
    }
}

fn classify_error(err: rhai::EvalAltResult, step_id: &str, cancelled: bool) -> FlowError {
    if let Some(mut flow_err) = extract_flow_error(&err) {
        if flow_err.step.is_empty() {
            flow_err.step = step_id.to_string();
        }
        return flow_err;
    }

    if matches!(err, rhai::EvalAltResult::ErrorTerminated(..)) {
        // `on_progress` interrompeu a avaliação; o contexto já sabe se foi
        // cancelamento explícito ou estouro de deadline (§4.4).
        let (code, message) = if cancelled {
            (codes::CONTEXT_CANCELLED, "execution was cancelled")
        } else {
            (codes::DEADLINE_EXCEEDED, "execution deadline exceeded")
        };
        return FlowError::new(FlowErrorType::Timeout, code, message).with_step(step_id);
    }

    FlowError::new(FlowErrorType::Permanent, codes::RUNTIME_ERROR, err.to_string())
        .with_step(step_id)
        .with_cause(err)
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

    #[tokio::test]
    async fn test_scalar_result_deposited_with_set() {
        let mut execution = new_execution();
        let step = Step {
            id: "s".into(),
            body: "1 + 1".into(),
            condition: None,
            timeout_ms: 0,
            retry: None,
            fallback_body: None,
            compensate_body: None,
        };
        execute_step(&mut execution, &step).await.expect("succeeds");
        assert_eq!(execution.store.get("s"), Some(&Value::from(2)));
    }

    #[tokio::test]
    async fn test_map_result_deposited_with_set_nested() {
        let mut execution = new_execution();
        let step = Step {
            id: "s".into(),
            body: r#"#{ "row": #{ "id": "abc" } }"#.into(),
            condition: None,
            timeout_ms: 0,
            retry: None,
            fallback_body: None,
            compensate_body: None,
        };
        execute_step(&mut execution, &step).await.expect("succeeds");
        assert_eq!(execution.store.get("s.row.id"), Some(&Value::String("abc".into())));
    }

    #[tokio::test]
    async fn test_raise_surfaces_as_structured_flow_error() {
        let mut execution = new_execution();
        let step = Step {
            id: "s".into(),
            body: r#"raise("transient", "X", "boom")"#.into(),
            condition: None,
            timeout_ms: 0,
            retry: None,
            fallback_body: None,
            compensate_body: None,
        };
        let err = execute_step(&mut execution, &step).await.unwrap_err();
        assert_eq!(err.error_type, FlowErrorType::Transient);
        assert_eq!(err.code, "X");
        assert_eq!(err.step, "s");
    }

    #[tokio::test]
    async fn test_empty_body_is_noop() {
        let mut execution = new_execution();
        let step = Step {
            id: "s".into(),
            body: "   ".into(),
            condition: None,
            timeout_ms: 0,
            retry: None,
            fallback_body: None,
            compensate_body: None,
        };
        execute_step(&mut execution, &step).await.expect("succeeds");
        assert_eq!(execution.store.get("s"), None);
    }
}

//! # Módulo de Flow Executor
//!
//! A máquina de estados central (§4.5): para cada step, na ordem do
//! flow, avalia a condição, roda o loop de tentativas com retry e
//! backoff, aciona o fallback em caso de falha terminal, e, se o flow
//! inteiro falhar, roda o handler `on_error` e desfaz (compensa) os
//! steps bem-sucedidos em ordem reversa.
//!
//! ## Para todos entenderem:
//!
//! Pense numa linha de produção: cada step é uma estação. Se uma
//! estação falha, primeiro ela tenta de novo algumas vezes (retry); se
//! ainda assim falhar, tem um plano B (fallback); se nem o plano B
//! funcionar, a fábrica inteira aciona um protocolo de emergência
//! (`on_error`) e desfaz o que as estações anteriores já tinham feito
//! (compensação), na ordem inversa de quem terminou primeiro.

use crate::dsl::{Flow, Step, RETURN_STEP_ID};
use crate::errors::{codes, FlowError};
use crate::execution::{CompensationEntry, CompensationPath, Execution};
use crate::expression;
use crate::step_executor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Fonte de aleatoriedade para o jitter de backoff. Uma porta de saída
/// deliberada (§9: "jitter randomness must come from a seedable source
/// for deterministic tests") — em produção usa `rand::thread_rng`, em
/// teste uma semente fixa.
pub trait JitterSource: Send {
    /// Um fator uniforme em `[0.5, 1.5)`.
    fn factor(&mut self) -> f64;
}

pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn factor(&mut self) -> f64 {
        rand::thread_rng().gen_range(0.5..1.5)
    }
}

/// Fonte de jitter determinística, para testes que precisam prever o
/// atraso exato.
pub struct SeededJitter(StdRng);

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl JitterSource for SeededJitter {
    fn factor(&mut self) -> f64 {
        self.0.gen_range(0.5..1.5)
    }
}

/// Executa um flow por completo: avalia steps em ordem, lida com
/// retry/fallback por step, e com `on_error`/compensação no nível do
/// flow. Usa `rand::thread_rng` para jitter; veja `execute_flow_with_jitter`
/// para controlar a fonte de aleatoriedade (testes).
pub async fn execute_flow(execution: &mut Execution, flow: &Flow) -> Result<(), FlowError> {
    let mut jitter = ThreadRngJitter;
    execute_flow_with_jitter(execution, flow, &mut jitter).await
}

/// Como `execute_flow`, recebendo a fonte de jitter explicitamente.
#[tracing::instrument(skip(execution, flow, jitter), fields(flow_id = %flow.id))]
pub async fn execute_flow_with_jitter(
    execution: &mut Execution,
    flow: &Flow,
    jitter: &mut dyn JitterSource,
) -> Result<(), FlowError> {
    // O deadline de flow governa todo step e toda espera entre tentativas
    // (§4.5, §5); derivamos o contexto uma única vez, antes do primeiro step.
    execution.ctx = execution.ctx.child_with_timeout(flow.timeout_ms);

    let synthetic_return = flow.return_body.as_ref().map(|body| Step {
        id: RETURN_STEP_ID.to_string(),
        body: body.clone(),
        condition: None,
        timeout_ms: 0,
        retry: None,
        fallback_body: None,
        compensate_body: None,
    });

    let mut steps: Vec<&Step> = flow.steps.iter().collect();
    if let Some(ref return_step) = synthetic_return {
        steps.push(return_step);
    }

    for step in steps {
        if execution.ctx.is_done() {
            let err = context_done_error(execution, &step.id);
            return finalize_flow_failure(execution, flow, err).await;
        }

        match should_run_step(execution, step) {
            Ok(false) => continue,
            Err(err) => return finalize_flow_failure(execution, flow, err).await,
            Ok(true) => {}
        }

        if let Err(err) = run_step_attempts(execution, step, jitter).await {
            if let Some(err) = try_fallback(execution, step, err).await {
                return finalize_flow_failure(execution, flow, err).await;
            }
        }
    }

    Ok(())
}

fn should_run_step(execution: &Execution, step: &Step) -> Result<bool, FlowError> {
    match &step.condition {
        Some(condition) if !condition.trim().is_empty() => {
            let value = expression::evaluate(execution, condition)
                .map_err(|err| err.with_step(step.id.clone()))?;
            Ok(!expression::is_falsy(&value))
        }
        _ => Ok(true),
    }
}

/// Loop de tentativas de um único step (§4.5, passo 2): cada iteração
/// roda o corpo sob um contexto filho limitado por `step.timeout_ms`,
/// classifica a falha, decide se tenta de novo, e dorme o atraso de
/// backoff entre tentativas.
async fn run_step_attempts(
    execution: &mut Execution,
    step: &Step,
    jitter: &mut dyn JitterSource,
) -> Result<(), FlowError> {
    let retry = step.retry.clone().unwrap_or_default();
    let max_attempts = retry.max_attempts.max(1);
    let mut last_err: Option<FlowError> = None;

    for attempt in 1..=max_attempts {
        if execution.ctx.is_done() {
            return Err(last_err.unwrap_or_else(|| context_done_error(execution, &step.id)));
        }

        let flow_ctx = execution.ctx.clone();
        execution.ctx = flow_ctx.child_with_timeout(step.timeout_ms);
        let result = step_executor::execute_step(execution, step).await;
        execution.ctx = flow_ctx;

        let mut err = match result {
            Ok(()) => {
                execution.record_success(step.id.clone(), CompensationPath::Main);
                return Ok(());
            }
            Err(err) => err,
        };
        err.retries = attempt - 1;

        if retry.non_retryable.iter().any(|code| code == &err.code) {
            return Err(err);
        }

        if let Some(when) = &retry.when {
            let extra = vec![("error".to_string(), serde_json::Value::Object(err.to_map()))];
            let should_retry = expression::evaluate_with_extra(execution, when, extra)
                .map(|v| !expression::is_falsy(&v))
                .unwrap_or(false);
            if !should_retry {
                return Err(err);
            }
        }

        if attempt >= max_attempts {
            return Err(err);
        }

        let delay = backoff_delay(attempt, &retry, jitter);
        tracing::warn!(step_id = %step.id, attempt, delay_ms = delay.as_millis() as u64, "retrying step after failure");
        cancellable_sleep(&execution.ctx, delay).await;
        if execution.ctx.is_done() {
            return Err(err);
        }
        last_err = Some(err);
    }

    Err(last_err.unwrap_or_else(|| FlowError::permanent(codes::INTERNAL_ERROR, "retry loop exited without an outcome")))
}

/// Aplica o fallback de um step, se houver um (§4.5, passo 3). Devolve
/// `None` se o fallback recuperou a execução, ou o erro final (do
/// fallback, ou o original se não há fallback) caso contrário.
async fn try_fallback(execution: &mut Execution, step: &Step, err: FlowError) -> Option<FlowError> {
    if step.fallback_body.is_none() {
        return Some(err);
    }
    match step_executor::execute_fallback(execution, step).await {
        Ok(()) => {
            execution.record_success(step.id.clone(), CompensationPath::Fallback);
            None
        }
        Err(fallback_err) => Some(fallback_err),
    }
}

/// Falha terminal de um step se propagou até o nível do flow: roda
/// `on_error` (se houver), e, se o erro persistir, desfaz os steps
/// bem-sucedidos em ordem reversa (§4.5, passo 3; §7).
async fn finalize_flow_failure(
    execution: &mut Execution,
    flow: &Flow,
    err: FlowError,
) -> Result<(), FlowError> {
    let mut final_err = Some(err);

    if let Some(body) = &flow.on_error_body {
        let original = final_err.clone().expect("final_err set above");
        let handler_result = step_executor::execute_on_error_handler(execution, body, &original).await;
        // O erro só é considerado tratado se o handler teve sucesso E
        // montou uma resposta — do contrário o erro original persiste (§4.5).
        if handler_result.is_ok() && execution.response_descriptor.is_some() {
            final_err = None;
        }
    }

    match final_err {
        None => Ok(()),
        Some(err) => {
            run_compensation(execution, flow).await;
            Err(err)
        }
    }
}

async fn run_compensation(execution: &mut Execution, flow: &Flow) {
    let entries: Vec<CompensationEntry> = execution.compensation_log.drain(..).rev().collect();
    for entry in entries {
        let Some(step) = flow.find_step(&entry.step_id) else {
            continue;
        };
        let Some(body) = &step.compensate_body else {
            continue;
        };
        let path_label = match entry.path {
            CompensationPath::Main => "main",
            CompensationPath::Fallback => "fallback",
        };
        tracing::info!(step_id = %entry.step_id, path = path_label, "running compensation");
        if let Err(comp_err) = step_executor::execute_compensation(execution, body, &entry.step_id, path_label).await {
            // Falha de compensação é logada, não substitui o erro original (§7).
            tracing::warn!(step_id = %entry.step_id, error = %comp_err, "compensation failed");
        }
    }
}

fn context_done_error(execution: &Execution, step_id: &str) -> FlowError {
    let code = if execution.ctx.is_cancelled() {
        codes::CONTEXT_CANCELLED
    } else {
        codes::DEADLINE_EXCEEDED
    };
    FlowError::timeout(code, "execution context done before step could run").with_step(step_id)
}

async fn cancellable_sleep(ctx: &crate::execution::ExecutionContext, duration: Duration) {
    const POLL_INTERVAL: Duration = Duration::from_millis(25);
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if ctx.is_done() {
            return;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return;
        }
        tokio::time::sleep(std::cmp::min(deadline - now, POLL_INTERVAL)).await;
    }
}

/// Atraso de backoff entre tentativas `attempt-1` e `attempt` (1-based,
/// `attempt` é a tentativa que acabou de falhar) — fórmula exata de §4.5.
pub fn backoff_delay(attempt: u32, retry: &crate::dsl::RetryConfig, jitter: &mut dyn JitterSource) -> Duration {
    use crate::dsl::Backoff;

    let base = retry.delay_ms as f64;
    let mut delay = match retry.backoff {
        Backoff::None => base,
        Backoff::Linear => base * attempt as f64,
        Backoff::Exponential => base * 2f64.powi(attempt as i32 - 1),
    };

    if retry.max_delay_ms > 0 && delay > retry.max_delay_ms as f64 {
        delay = retry.max_delay_ms as f64;
    }

    if retry.jitter {
        delay *= jitter.factor();
        if retry.max_delay_ms > 0 && delay > retry.max_delay_ms as f64 {
            delay = retry.max_delay_ms as f64;
        }
    }

    Duration::from_millis(delay.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{demo::build_demo_container, Container};
    use crate::dsl::{self, Backoff, RetryConfig};
    use crate::execution::ExecutionContext;
    use serde_json::Value;
    use std::sync::Arc;

    fn new_execution() -> Execution {
        Execution::new(Arc::new(build_demo_container()), ExecutionContext::unbounded(), "test-exec")
    }

    fn bare_execution() -> Execution {
        Execution::new(Arc::new(Container::new()), ExecutionContext::unbounded(), "test-exec")
    }

    struct FixedJitter(f64);
    impl JitterSource for FixedJitter {
        fn factor(&mut self) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_backoff_none_is_constant() {
        let retry = RetryConfig { delay_ms: 100, backoff: Backoff::None, ..Default::default() };
        let mut jitter = FixedJitter(1.0);
        assert_eq!(backoff_delay(1, &retry, &mut jitter), Duration::from_millis(100));
        assert_eq!(backoff_delay(3, &retry, &mut jitter), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_linear_scales_with_attempt() {
        let retry = RetryConfig { delay_ms: 100, backoff: Backoff::Linear, ..Default::default() };
        let mut jitter = FixedJitter(1.0);
        assert_eq!(backoff_delay(3, &retry, &mut jitter), Duration::from_millis(300));
    }

    #[test]
    fn test_backoff_exponential_doubles() {
        let retry = RetryConfig { delay_ms: 100, backoff: Backoff::Exponential, ..Default::default() };
        let mut jitter = FixedJitter(1.0);
        assert_eq!(backoff_delay(1, &retry, &mut jitter), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, &retry, &mut jitter), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, &retry, &mut jitter), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_clamped_by_max_delay() {
        let retry = RetryConfig {
            delay_ms: 100,
            backoff: Backoff::Exponential,
            max_delay_ms: 250,
            ..Default::default()
        };
        let mut jitter = FixedJitter(1.0);
        assert_eq!(backoff_delay(3, &retry, &mut jitter), Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_jitter_applied_and_reclamped() {
        let retry = RetryConfig {
            delay_ms: 100,
            backoff: Backoff::None,
            max_delay_ms: 120,
            jitter: true,
            ..Default::default()
        };
        let mut jitter = FixedJitter(1.5);
        assert_eq!(backoff_delay(1, &retry, &mut jitter), Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_condition_skip_scenario() {
        let source = r#"
step a { 1 }
step b(condition: a == 2) { 2 }
return response.json(#{status: 200, body: #{v: a}})
"#;
        let flow = dsl::parse("demo", source).expect("parses");
        let mut execution = new_execution();
        execute_flow(&mut execution, &flow).await.expect("flow succeeds");
        assert_eq!(execution.store.get("b"), None);
        let response = execution.response_descriptor.expect("response set");
        assert_eq!(response.args["body"]["v"], Value::from(1));
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts_then_propagates() {
        let source = r#"
step s(retry: { max_attempts: 3, delay: 1, backoff: "exponential" }) {
    raise("transient", "X", "boom")
}
"#;
        let flow = dsl::parse("demo", source).expect("parses");
        let mut execution = bare_execution();
        let err = execute_flow(&mut execution, &flow).await.unwrap_err();
        assert_eq!(err.code, "X");
        assert_eq!(err.retries, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let source = r#"
step s(retry: { max_attempts: 3, delay: 1, non_retryable: ["X"] }) {
    raise("transient", "X", "boom")
}
"#;
        let flow = dsl::parse("demo", source).expect("parses");
        let mut execution = bare_execution();
        let err = execute_flow(&mut execution, &flow).await.unwrap_err();
        assert_eq!(err.retries, 0);
    }

    #[tokio::test]
    async fn test_compensation_runs_in_reverse_order() {
        let source = r#"
step a { 1 } compensate { 1 }
step b { 2 } compensate { 2 }
step c { 3 } compensate { 3 }
step d { raise("permanent", "BOOM", "nope") }
"#;
        let flow = dsl::parse("demo", source).expect("parses");
        let mut execution = bare_execution();
        let err = execute_flow(&mut execution, &flow).await.unwrap_err();
        assert_eq!(err.code, "BOOM");
        // O log foi drenado por run_compensation; cada step de a..c teve sua
        // compensação invocada exatamente uma vez (sem asserção de ordem
        // observável aqui além de não restar nada pendente).
        assert_eq!(execution.compensation_log.len(), 0);
    }

    #[tokio::test]
    async fn test_step_timeout_classified_as_deadline_exceeded() {
        let source = r#"
step s(timeout: 20) {
    loop { }
}
"#;
        let flow = dsl::parse("demo", source).expect("parses");
        let mut execution = bare_execution();
        let err = execute_flow(&mut execution, &flow).await.unwrap_err();
        assert_eq!(err.error_type, crate::errors::FlowErrorType::Timeout);
        assert_eq!(err.code, codes::DEADLINE_EXCEEDED);
    }

    #[tokio::test]
    async fn test_nested_plugin_result_is_addressable() {
        let source = "step s { math.add(#{ a: 1, b: 1 }) }";
        let flow = dsl::parse("demo", source).expect("parses");
        let mut execution = new_execution();
        execute_flow(&mut execution, &flow).await.expect("succeeds");
        assert_eq!(execution.store.get("s.sum"), Some(&Value::from(2.0)));
    }
}

//! # Módulo de Validação de Flow
//!
//! Valida um `Flow` já parseado contra os `ExecutionLimits` antes de
//! executá-lo, para falhar cedo com uma mensagem específica em vez de
//! descobrir o problema no meio de uma execução.

use crate::dsl::Flow;
use crate::limits::ExecutionLimits;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("flow '{flow_id}' has {count} steps, exceeding the limit of {max}")]
    TooManySteps { flow_id: String, count: usize, max: usize },

    #[error("flow '{flow_id}' timeout_ms {timeout_ms} exceeds the limit of {max}")]
    FlowTimeoutTooLarge { flow_id: String, timeout_ms: u64, max: u64 },

    #[error("step '{step_id}' timeout_ms {timeout_ms} exceeds the limit of {max}")]
    StepTimeoutTooLarge { step_id: String, timeout_ms: u64, max: u64 },

    #[error("step '{step_id}' retry.max_attempts {max_attempts} exceeds the limit of {max}")]
    TooManyRetryAttempts { step_id: String, max_attempts: u32, max: u32 },

    #[error("flow '{flow_id}' has no steps")]
    EmptyFlow { flow_id: String },
}

pub fn validate_flow(flow: &Flow, limits: &ExecutionLimits) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if flow.steps.is_empty() && flow.return_body.is_none() {
        errors.push(ValidationError::EmptyFlow { flow_id: flow.id.clone() });
    }

    if flow.steps.len() > limits.max_steps {
        errors.push(ValidationError::TooManySteps {
            flow_id: flow.id.clone(),
            count: flow.steps.len(),
            max: limits.max_steps,
        });
    }

    if flow.timeout_ms > limits.max_flow_timeout_ms {
        errors.push(ValidationError::FlowTimeoutTooLarge {
            flow_id: flow.id.clone(),
            timeout_ms: flow.timeout_ms,
            max: limits.max_flow_timeout_ms,
        });
    }

    for step in &flow.steps {
        if step.timeout_ms > limits.max_step_timeout_ms {
            errors.push(ValidationError::StepTimeoutTooLarge {
                step_id: step.id.clone(),
                timeout_ms: step.timeout_ms,
                max: limits.max_step_timeout_ms,
            });
        }
        if let Some(retry) = &step.retry {
            if retry.max_attempts > limits.max_retry_attempts {
                errors.push(ValidationError::TooManyRetryAttempts {
                    step_id: step.id.clone(),
                    max_attempts: retry.max_attempts,
                    max: limits.max_retry_attempts,
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse;

    #[test]
    fn test_valid_flow_passes() {
        let flow = parse("demo", "step a { 1 }").expect("parses");
        assert!(validate_flow(&flow, &ExecutionLimits::default()).is_ok());
    }

    #[test]
    fn test_too_many_steps_rejected() {
        let mut limits = ExecutionLimits::default();
        limits.max_steps = 1;
        let flow = parse("demo", "step a { 1 }\nstep b { 2 }").expect("parses");
        let errors = validate_flow(&flow, &limits).unwrap_err();
        assert!(matches!(errors[0], ValidationError::TooManySteps { .. }));
    }

    #[test]
    fn test_empty_flow_rejected() {
        let flow = parse("demo", "properties { x: 1 }").expect("parses");
        let errors = validate_flow(&flow, &ExecutionLimits::default()).unwrap_err();
        assert!(matches!(errors[0], ValidationError::EmptyFlow { .. }));
    }
}

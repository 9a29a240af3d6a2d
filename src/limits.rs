//! # Módulo de Limites de Execução
//!
//! Guarda-corpos para proteger o motor contra flows malformados ou
//! patológicos: número de steps, tentativas de retry, timeouts. Não é um
//! requisito explícito da especificação do núcleo, mas é o tipo de
//! hardening ambiente que qualquer execução de scripts de terceiros
//! precisa — o mesmo papel que limites de execução cumprem em qualquer
//! motor de planos/DAGs desta família.
//!
//! ## Para todos entenderem:
//!
//! São as mesmas regras de "máximo de pedidos por mesa" de um
//! restaurante: sem elas, um flow mal escrito (ou gerado por IA) poderia
//! travar o processo inteiro.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_STEPS: usize = 200;
pub const DEFAULT_MAX_FLOW_TIMEOUT_MS: u64 = 10 * 60 * 1000; // 10 minutos
pub const DEFAULT_MAX_STEP_TIMEOUT_MS: u64 = 60 * 1000; // 1 minuto
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 20;

/// Configuração de limites de execução. Todos os campos têm defaults
/// seguros; pode ser sobrescrita via flags de CLI ou variáveis de
/// ambiente `FLOWCORE_*` (ver `ExecutionLimits::from_env`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub max_steps: usize,
    pub max_flow_timeout_ms: u64,
    pub max_step_timeout_ms: u64,
    pub max_retry_attempts: u32,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_flow_timeout_ms: DEFAULT_MAX_FLOW_TIMEOUT_MS,
            max_step_timeout_ms: DEFAULT_MAX_STEP_TIMEOUT_MS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }
}

impl ExecutionLimits {
    pub fn from_env() -> Self {
        let mut limits = Self::default();
        if let Ok(v) = std::env::var("FLOWCORE_MAX_STEPS") {
            if let Ok(parsed) = v.parse() {
                limits.max_steps = parsed;
            }
        }
        if let Ok(v) = std::env::var("FLOWCORE_MAX_FLOW_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse() {
                limits.max_flow_timeout_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("FLOWCORE_MAX_STEP_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse() {
                limits.max_step_timeout_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("FLOWCORE_MAX_RETRY_ATTEMPTS") {
            if let Ok(parsed) = v.parse() {
                limits.max_retry_attempts = parsed;
            }
        }
        limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_positive() {
        let limits = ExecutionLimits::default();
        assert!(limits.max_steps > 0);
        assert!(limits.max_retry_attempts > 0);
    }
}

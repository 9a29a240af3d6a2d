//! # flowcore - Motor de Execução de Flows
//!
//! Este é o **ponto de entrada principal** do flowcore, o núcleo que
//! interpreta um arquivo `.flow` e o executa até o fim ou até uma
//! falha não recuperável.
//!
//! ## O que este arquivo faz?
//!
//! 1. **Processa argumentos da linha de comando** (CLI) usando a biblioteca `clap`
//! 2. **Carrega e valida** o arquivo `.flow`
//! 3. **Inicializa o sistema de telemetria** (OpenTelemetry) para observabilidade
//! 4. **Executa o flow** via o Flow Executor
//! 5. **Imprime a resposta** (ou o erro) como JSON
//!
//! ## Exemplo de uso:
//!
//! ```bash
//! flowcore run --file checkout.flow --var customer_id=42
//! flowcore validate --file checkout.flow
//! ```
//!
//! ## Arquitetura
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           main.rs                                │
//! │  (CLI, orquestração, telemetria)                                 │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!          ┌──────────────────┬──┴───────────────┬──────────────────┐
//!          ▼                  ▼                  ▼                  ▼
//!    ┌──────────┐      ┌─────────────┐    ┌──────────────┐   ┌────────────┐
//!    │ loader/  │      │dsl/ (parser)│    │flow_executor │   │ container  │
//!    │ (.flow)  │      │             │    │ (orquestra)  │   │ (plugins)  │
//!    └──────────┘      └─────────────┘    └──────────────┘   └────────────┘
//! ```

mod bridge;
mod container;
mod dsl;
mod errors;
mod execution;
mod expression;
mod flow_executor;
mod limits;
mod loader;
mod step_executor;
mod store;
mod telemetry;
mod validation;

use clap::{Parser, Subcommand};
use container::demo::build_demo_container;
use execution::{Execution, ExecutionContext};
use limits::ExecutionLimits;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use tracing::{error, info, Level};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "flowcore")]
#[command(about = "Flow execution engine core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parseia, valida e executa um arquivo `.flow`.
    Run {
        /// Caminho para o arquivo `.flow`.
        #[arg(short, long)]
        file: PathBuf,

        /// Variáveis iniciais do value store, no formato `key=value`
        /// (o valor é interpretado como JSON; se não for JSON válido,
        /// é gravado como string literal).
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Habilita exportação de traces para OpenTelemetry.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// Endpoint do collector OTEL (opcional).
        #[arg(long)]
        otel_endpoint: Option<String>,

        /// Modo silencioso: apenas erros críticos no stderr.
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,

        /// Modo verbose: logs detalhados de debug.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,

        /// ID de execução customizado (UUID).
        #[arg(long)]
        execution_id: Option<String>,
    },

    /// Parseia e valida um arquivo `.flow` sem executá-lo.
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            file,
            vars,
            otel,
            otel_endpoint,
            silent,
            verbose,
            execution_id,
        } => {
            let exec_id = execution_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if *silent {
                Level::ERROR
            } else if *verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };
            if *otel {
                if let Some(endpoint) = otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }

            if let Err(e) = init_telemetry(telemetry_config) {
                if !*silent {
                    eprintln!("Warning: Failed to initialize telemetry: {}", e);
                }
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            let exit_code = run_flow(file, vars, &exec_id, *silent).await;
            shutdown_telemetry();
            std::process::exit(exit_code);
        }
        Commands::Validate { file } => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init();
            std::process::exit(validate_flow_file(file));
        }
    }
}

/// Carrega, valida e executa um `.flow`, imprimindo o resultado como JSON.
/// Retorna o código de saída do processo.
async fn run_flow(file_path: &PathBuf, vars: &[String], execution_id: &str, silent: bool) -> i32 {
    if !silent {
        info!(execution_id = %execution_id, file = %file_path.display(), "flowcore starting");
    }

    let flow = match loader::load_flow_file(file_path) {
        Ok(flow) => flow,
        Err(e) => {
            error!(error = %e, "failed to load flow");
            return 1;
        }
    };

    let limits = ExecutionLimits::from_env();
    if let Err(errors) = validation::validate_flow(&flow, &limits) {
        error!("flow validation failed with {} error(s):", errors.len());
        for err in &errors {
            error!("  - {}", err);
        }
        return 1;
    }

    let container = Arc::new(build_demo_container());
    let mut execution = Execution::new(container, ExecutionContext::unbounded(), execution_id);

    for raw in vars {
        match raw.split_once('=') {
            Some((key, value)) => {
                let parsed = serde_json::from_str::<Value>(value)
                    .unwrap_or_else(|_| Value::String(value.to_string()));
                execution.store.set(key, parsed);
            }
            None => {
                error!(raw = %raw, "ignoring malformed --var (expected key=value)");
            }
        }
    }

    let result = flow_executor::execute_flow(&mut execution, &flow).await;

    match result {
        Ok(()) => {
            if !silent {
                info!("flow execution finished");
            }
            match &execution.response_descriptor {
                Some(response) => {
                    let json = serde_json::json!({
                        "handler": response.handler_name,
                        "args": response.args,
                    });
                    println!("{}", serde_json::to_string_pretty(&json).expect("serializes"));
                }
                None => {
                    println!("{}", serde_json::to_string_pretty(execution.store.all()).expect("serializes"));
                }
            }
            0
        }
        Err(err) => {
            error!(error = %err, "flow execution failed");
            let json = Value::Object(err.to_map());
            println!("{}", serde_json::to_string_pretty(&json).expect("serializes"));
            1
        }
    }
}

fn validate_flow_file(file_path: &PathBuf) -> i32 {
    let flow = match loader::load_flow_file(file_path) {
        Ok(flow) => flow,
        Err(e) => {
            eprintln!("parse error: {e}");
            return 1;
        }
    };

    let limits = ExecutionLimits::from_env();
    match validation::validate_flow(&flow, &limits) {
        Ok(()) => {
            println!("flow '{}' is valid ({} steps)", flow.id, flow.steps.len());
            0
        }
        Err(errors) => {
            for err in &errors {
                eprintln!("validation error: {err}");
            }
            1
        }
    }
}

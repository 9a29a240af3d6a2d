//! # Módulo de Script Bridge
//!
//! Media entre os valores nativos do host e a VM de script embutida
//! ([rhai](https://rhai.rs)). Monta, a cada invocação de step, um
//! ambiente (`Engine` + `Scope`) fresco: cópia rasa do value store,
//! namespaces de plugin como módulos estáticos, handlers de `response`,
//! e os helpers fixos (`sprintf`, `base64_encode`, `raise`).
//!
//! ## Para todos entenderem:
//!
//! Cada vez que um step vai rodar, construímos uma "sala" nova para o
//! script: as variáveis que ele pode ver (o ambiente), e as "ferramentas"
//! que ele pode chamar (plugins, `response.*`, `raise`). Depois que o
//! script termina, a sala é descartada — só o que foi explicitamente
//! devolvido ou gravado no value store sobrevive.

pub mod convert;
mod helpers;

use crate::container::Container;
use crate::execution::{Execution, ExecutionContext, ResponseDescriptor};
use convert::{json_map_to_rhai, rhai_map_to_json, to_dynamic};
use rhai::{Dynamic, Engine, EvalAltResult, Module, Scope};
use serde_json::Value;
use std::sync::{Arc, Mutex};

pub use helpers::extract_flow_error;

/// O valor pendente de uma chamada `response.<handler>(...)` dentro de
/// uma única invocação de engine, repassado de volta à `Execution` pelo
/// chamador depois que `eval` retorna (os closures nativos do Rhai não
/// têm acesso direto e mutável à `Execution`).
type ResponseCell = Arc<Mutex<Option<ResponseDescriptor>>>;

/// Ambiente pronto para uma única invocação da VM: o `Engine` já
/// configurado e o `Scope` com as variáveis do ambiente.
pub struct StepEnv {
    pub engine: Engine,
    pub scope: Scope<'static>,
    response_cell: ResponseCell,
}

impl StepEnv {
    /// Chama depois de `engine.eval_with_scope`: se o script chamou
    /// `response.*`, devolve o descritor para a `Execution` gravar.
    pub fn take_response(&self) -> Option<ResponseDescriptor> {
        self.response_cell.lock().expect("response cell poisoned").take()
    }
}

/// Monta o ambiente completo usado por `ExecuteStep`,
/// `ExecuteOnErrorHandler` e `ExecuteCompensation`: value store + plugins
/// + response handlers + helpers fixos + promoção de `properties`.
pub fn build_for_step(execution: &Execution, extra_globals: Vec<(String, Value)>) -> StepEnv {
    build(execution, true, true, extra_globals)
}

/// Monta o ambiente restrito usado pelo Expression Evaluator: apenas o
/// value store convertido (sem promoção, sem plugins, sem `raise`/helpers).
pub fn build_for_expression(execution: &Execution) -> StepEnv {
    build(execution, false, false, Vec::new())
}

/// Como `build_for_expression`, mas com variáveis extras injetadas — usado
/// por `retry.when`, que precisa ver `error` sem ganhar acesso a plugins.
pub fn build_for_expression_with_extra(execution: &Execution, extra_globals: Vec<(String, Value)>) -> StepEnv {
    build(execution, false, false, extra_globals)
}

fn build(
    execution: &Execution,
    promote_properties: bool,
    with_capabilities: bool,
    extra_globals: Vec<(String, Value)>,
) -> StepEnv {
    let mut engine = Engine::new();
    let response_cell: ResponseCell = Arc::new(Mutex::new(None));

    if with_capabilities {
        helpers::register(&mut engine);
        register_plugins(&mut engine, &execution.container);
        register_response_handlers(&mut engine, &execution.container, Arc::clone(&response_cell));
    }

    let ctx = execution.ctx.clone();
    engine.on_progress(move |_ops| {
        if ctx.is_done() {
            Some(Dynamic::from("execution context done"))
        } else {
            None
        }
    });

    let mut scope = Scope::new();
    for (key, value) in execution.store.all() {
        scope.push(key.clone(), to_dynamic(value));
    }

    if promote_properties {
        if let Some(Value::Object(properties)) = execution.store.all().get("properties") {
            for (key, value) in properties {
                if !scope.contains(key) {
                    scope.push(key.clone(), to_dynamic(value));
                }
            }
        }
    }

    for (key, value) in extra_globals {
        scope.push(key, to_dynamic(&value));
    }

    StepEnv {
        engine,
        scope,
        response_cell,
    }
}

/// Registra cada plugin do container como um módulo estático Rhai: as
/// chaves de método não ficam sombreadas pelos métodos genéricos de mapa
/// porque um `rhai::Module` não é um `rhai::Map`.
fn register_plugins(engine: &mut Engine, container: &Arc<Container>) {
    for (plugin_name, methods) in container.plugins() {
        let mut module = Module::new();
        for (method_name, task) in methods {
            let task = Arc::clone(task);
            module.set_native_fn(method_name.clone(), move |args: rhai::Map| {
                run_plugin_task(&task, args)
            });
        }
        engine.register_static_module(plugin_name, module.into());
    }
}

fn run_plugin_task(
    task: &Arc<dyn crate::container::PluginTask>,
    args: rhai::Map,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let json_args = rhai_map_to_json(&args);
    let task = Arc::clone(task);
    // `Engine::eval` é síncrono; como as tasks de plugin são `async`, e já
    // estamos dentro de um `block_in_place` montado por quem chamou
    // `eval_with_scope`, basta voltar ao runtime Tokio para esta chamada.
    let result = tokio::runtime::Handle::current().block_on(task.execute(json_args));
    match result {
        Ok(value) => Ok(to_dynamic(&value)),
        Err(flow_error) => {
            let map = to_dynamic(&Value::Object(flow_error.to_map()));
            Err(Box::new(EvalAltResult::ErrorRuntime(map, rhai::Position::NONE)))
        }
    }
}

/// Registra um módulo estático `response` com uma função nativa por
/// handler conhecido; toda função tem o mesmo efeito genérico — montar o
/// `response_descriptor` e devolver `()` — por isso basta o nome para
/// diferenciar o comportamento observável.
fn register_response_handlers(engine: &mut Engine, container: &Arc<Container>, cell: ResponseCell) {
    let mut module = Module::new();
    for name in container.response_handler_names() {
        let handler_name = format!("response.{name}");
        let cell_one_arg = Arc::clone(&cell);
        let handler_one = handler_name.clone();
        module.set_native_fn(name.clone(), move |args: rhai::Map| -> Result<(), Box<EvalAltResult>> {
            set_response(&cell_one_arg, &handler_one, Value::Object(rhai_map_to_json(&args)));
            Ok(())
        });

        let cell_two_arg = Arc::clone(&cell);
        let handler_two = handler_name.clone();
        module.set_native_fn(
            name.clone(),
            move |status: i64, body: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let args = serde_json::json!({ "status": status, "body": convert::from_dynamic(&body) });
                set_response(&cell_two_arg, &handler_two, args);
                Ok(())
            },
        );
    }
    engine.register_static_module("response", module.into());
}

fn set_response(cell: &ResponseCell, handler_name: &str, args: Value) {
    let mut guard = cell.lock().expect("response cell poisoned");
    *guard = Some(ResponseDescriptor {
        handler_name: handler_name.to_string(),
        args,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    #[test]
    fn test_build_for_expression_has_no_response_module() {
        let mut execution = Execution::new(
            Arc::new(Container::new()),
            ExecutionContext::unbounded(),
            "exec-1",
        );
        execution.store.set("a", Value::from(1));
        let mut env = build_for_expression(&execution);
        let result: i64 = env
            .engine
            .eval_with_scope(&mut env.scope, "a")
            .expect("evaluates");
        assert_eq!(result, 1);
    }
}

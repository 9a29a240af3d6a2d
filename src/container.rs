//! # Módulo de Container: ABI de plugin tasks e response handlers
//!
//! Define as duas interfaces externas que o motor consome (§6 da
//! especificação), sem implementar nenhum plugin concreto — implementações
//! como um cliente HTTP ou um driver SQL ficam fora do núcleo por design;
//! aqui só vive o contrato e um registro read-only montado uma vez por flow.

use crate::errors::FlowError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Uma task de plugin, descoberta pelo nome `<plugin>.<method>` e exposta
/// ao script como `<plugin>.<method>(args)`.
///
/// ## Para todos entenderem:
///
/// Pense num plugin como um "funcionário terceirizado": o motor não sabe
/// (nem precisa saber) como ele faz uma requisição HTTP ou acessa um
/// banco — só sabe que, dado um mapa de argumentos, ele devolve um mapa
/// de resultado ou um erro estruturado.
#[async_trait]
pub trait PluginTask: Send + Sync {
    async fn execute(&self, args: Map<String, Value>) -> Result<Value, FlowError>;
}

/// Registro read-only de plugin tasks e nomes de response handler
/// disponíveis para os flows executados por este processo.
///
/// Montado uma única vez no processo e compartilhado (via `Arc`) por
/// todas as execuções; cada `PluginTask` é responsável por sua própria
/// concorrência interna, já que o motor não protege nada aqui com locks.
#[derive(Clone, Default)]
pub struct Container {
    tasks: HashMap<String, HashMap<String, Arc<dyn PluginTask>>>,
    response_handlers: Vec<String>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra uma task sob `<plugin>.<method>`.
    pub fn register_task(&mut self, plugin: impl Into<String>, method: impl Into<String>, task: Arc<dyn PluginTask>) {
        self.tasks.entry(plugin.into()).or_default().insert(method.into(), task);
    }

    pub fn register_response_handler(&mut self, name: impl Into<String>) {
        self.response_handlers.push(name.into());
    }

    pub fn plugins(&self) -> impl Iterator<Item = (&str, &HashMap<String, Arc<dyn PluginTask>>)> {
        self.tasks.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn response_handler_names(&self) -> &[String] {
        &self.response_handlers
    }
}

/// Plugins de demonstração usados pela CLI e pelos testes de ponta a
/// ponta do executor, já que implementações reais (HTTP, SQL, ...) estão
/// fora do escopo do núcleo.
pub mod demo {
    use super::*;

    /// `math.add(a, b) -> {sum}` — soma dois números; erro `permanent`
    /// se algum argumento não for numérico.
    pub struct MathAdd;

    #[async_trait]
    impl PluginTask for MathAdd {
        async fn execute(&self, args: Map<String, Value>) -> Result<Value, FlowError> {
            let a = args
                .get("a")
                .and_then(Value::as_f64)
                .ok_or_else(|| FlowError::permanent("INVALID_ARGS", "math.add requires numeric 'a'"))?;
            let b = args
                .get("b")
                .and_then(Value::as_f64)
                .ok_or_else(|| FlowError::permanent("INVALID_ARGS", "math.add requires numeric 'b'"))?;
            Ok(serde_json::json!({ "sum": a + b }))
        }
    }

    /// Monta um `Container` com os plugins de demonstração e os nomes de
    /// response handler conhecidos (`response.json`, `response.text`).
    pub fn build_demo_container() -> Container {
        let mut container = Container::new();
        container.register_task("math", "add", Arc::new(MathAdd));
        container.register_response_handler("json");
        container.register_response_handler("text");
        container
    }
}

#[cfg(test)]
mod tests {
    use super::demo::*;
    use super::*;

    #[tokio::test]
    async fn test_math_add_demo_task() {
        let task = MathAdd;
        let mut args = Map::new();
        args.insert("a".into(), Value::from(1));
        args.insert("b".into(), Value::from(2));
        let result = task.execute(args).await.expect("succeeds");
        assert_eq!(result, serde_json::json!({ "sum": 3.0 }));
    }

    #[test]
    fn test_demo_container_exposes_registered_plugin() {
        let container = build_demo_container();
        let plugins: Vec<&str> = container.plugins().map(|(name, _)| name).collect();
        assert!(plugins.contains(&"math"));
        assert!(container.response_handler_names().contains(&"json".to_string()));
    }
}

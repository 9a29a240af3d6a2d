//! # Funções fixas injetadas em todo ambiente de script
//!
//! `sprintf`, `base64_encode` e `raise` — os três helpers que a
//! especificação exige estarem sempre disponíveis, independente do flow.

use super::convert::{from_dynamic, to_dynamic};
use crate::errors::FlowError;
use base64::Engine as _;
use rhai::{Dynamic, EvalAltResult, Position};
use serde_json::Value;

/// Registra `sprintf`, `base64_encode` e `raise` (aridade 0 a 2, mais
/// 3+ dobrado em `raise_with_extra`) num `rhai::Engine` recém-criado.
pub fn register(engine: &mut rhai::Engine) {
    engine.register_fn("sprintf", sprintf_0);
    engine.register_fn("sprintf", sprintf_1);
    engine.register_fn("sprintf", sprintf_2);
    engine.register_fn("sprintf", sprintf_3);
    engine.register_fn("sprintf", sprintf_4);

    engine.register_fn("base64_encode", base64_encode);

    engine.register_result_fn("raise", raise_0);
    engine.register_result_fn("raise", raise_1);
    engine.register_result_fn("raise", raise_2);
    engine.register_result_fn("raise", raise_3);
    engine.register_result_fn("raise", raise_4);
    engine.register_result_fn("raise", raise_5);
    engine.register_result_fn("raise", raise_6);
}

fn sprintf_0(format: &str) -> String {
    render_sprintf(format, &[])
}
fn sprintf_1(format: &str, a: Dynamic) -> String {
    render_sprintf(format, &[a])
}
fn sprintf_2(format: &str, a: Dynamic, b: Dynamic) -> String {
    render_sprintf(format, &[a, b])
}
fn sprintf_3(format: &str, a: Dynamic, b: Dynamic, c: Dynamic) -> String {
    render_sprintf(format, &[a, b, c])
}
fn sprintf_4(format: &str, a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic) -> String {
    render_sprintf(format, &[a, b, c, d])
}

/// Formatador `printf`-like escrito à mão: reconhece `%s`, `%d`, `%f` e
/// `%v` (valor genérico) como placeholders, substituídos na ordem em que
/// aparecem pelos argumentos fornecidos.
fn render_sprintf(format: &str, args: &[Dynamic]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut arg_idx = 0usize;
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') | Some('d') | Some('f') | Some('v') => {
                if let Some(arg) = args.get(arg_idx) {
                    out.push_str(&render_value(arg));
                }
                arg_idx += 1;
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn render_value(value: &Dynamic) -> String {
    match from_dynamic(value) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Codifica um valor em base64: strings usam seus bytes UTF-8 diretamente;
/// qualquer outro valor é serializado para JSON antes de codificar.
fn base64_encode(value: Dynamic) -> String {
    let bytes = match from_dynamic(&value) {
        Value::String(s) => s.into_bytes(),
        other => other.to_string().into_bytes(),
    };
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn raise_0() -> Result<Dynamic, Box<EvalAltResult>> {
    Err(raise_error(FlowError::permanent(
        crate::errors::codes::RAISE,
        "raise() called with no arguments",
    )))
}

fn raise_1(arg: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    let value = from_dynamic(&arg);
    let err = match value {
        Value::Object(map) => {
            let code = map
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(crate::errors::codes::RAISE)
                .to_string();
            let error_type = map
                .get("type")
                .and_then(Value::as_str)
                .and_then(parse_error_type)
                .unwrap_or(crate::errors::FlowErrorType::Permanent);
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| code.clone());
            let mut flow_err = FlowError::new(error_type, code, message);
            if let Some(step) = map.get("step").and_then(Value::as_str) {
                flow_err = flow_err.with_step(step);
            }
            if let Some(retries) = map.get("retries").and_then(Value::as_u64) {
                flow_err = flow_err.with_retries(retries as u32);
            }
            flow_err
        }
        scalar => {
            let text = scalar.as_str().map(str::to_string).unwrap_or_else(|| scalar.to_string());
            FlowError::permanent(text.clone(), text)
        }
    };
    Err(raise_error(err))
}

fn raise_2(a: Dynamic, b: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    let code = scalar_string(&a);
    let message = scalar_string(&b);
    Err(raise_error(FlowError::permanent(code, message)))
}

fn raise_3(a: Dynamic, b: Dynamic, c: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    raise_with_extra(a, b, c, &[])
}

/// §4.3: "3+ args → `{type: arg0, code: arg1, message: arg2}`" — qualquer
/// argumento além do terceiro é dobrado no final da mensagem, já que a
/// forma do erro resultante não muda com a aridade.
fn raise_4(a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    raise_with_extra(a, b, c, &[d])
}

fn raise_5(a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic, e: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    raise_with_extra(a, b, c, &[d, e])
}

fn raise_6(
    a: Dynamic,
    b: Dynamic,
    c: Dynamic,
    d: Dynamic,
    e: Dynamic,
    f: Dynamic,
) -> Result<Dynamic, Box<EvalAltResult>> {
    raise_with_extra(a, b, c, &[d, e, f])
}

fn raise_with_extra(a: Dynamic, b: Dynamic, c: Dynamic, extra: &[Dynamic]) -> Result<Dynamic, Box<EvalAltResult>> {
    let error_type = parse_error_type(&scalar_string(&a)).unwrap_or(crate::errors::FlowErrorType::Permanent);
    let code = scalar_string(&b);
    let mut message = scalar_string(&c);
    for value in extra {
        message.push(' ');
        message.push_str(&scalar_string(value));
    }
    Err(raise_error(FlowError::new(error_type, code, message)))
}

fn scalar_string(value: &Dynamic) -> String {
    match from_dynamic(value) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn parse_error_type(raw: &str) -> Option<crate::errors::FlowErrorType> {
    match raw {
        "transient" => Some(crate::errors::FlowErrorType::Transient),
        "permanent" => Some(crate::errors::FlowErrorType::Permanent),
        "timeout" => Some(crate::errors::FlowErrorType::Timeout),
        _ => None,
    }
}

/// Empacota um `FlowError` como o valor carregado por um erro de runtime
/// do Rhai, para que o Step Executor o reconheça e o repasse intacto
/// (ver `extract_flow_error`).
fn raise_error(err: FlowError) -> Box<EvalAltResult> {
    let map = to_dynamic(&Value::Object(err.to_map()));
    Box::new(EvalAltResult::ErrorRuntime(map, Position::NONE))
}

/// Se `err` foi gerado por `raise(...)`, reconstrói o `FlowError`
/// original; caso contrário devolve `None` para que o chamador classifique
/// o erro como `RUNTIME_ERROR` genérico.
pub fn extract_flow_error(err: &EvalAltResult) -> Option<FlowError> {
    if let EvalAltResult::ErrorRuntime(dynamic, _) = err {
        if let Value::Object(map) = from_dynamic(dynamic) {
            if map.contains_key("type") && map.contains_key("code") && map.contains_key("message") {
                let error_type = map
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(parse_error_type)?;
                let code = map.get("code")?.as_str()?.to_string();
                let message = map.get("message")?.as_str()?.to_string();
                let mut flow_err = FlowError::new(error_type, code, message);
                if let Some(step) = map.get("step").and_then(Value::as_str) {
                    if !step.is_empty() {
                        flow_err = flow_err.with_step(step);
                    }
                }
                if let Some(retries) = map.get("retries").and_then(Value::as_u64) {
                    flow_err = flow_err.with_retries(retries as u32);
                }
                return Some(flow_err);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprintf_substitutes_in_order() {
        let out = render_sprintf("%s is %d", &[Dynamic::from("age"), Dynamic::from(30_i64)]);
        assert_eq!(out, "age is 30");
    }

    #[test]
    fn test_sprintf_percent_literal() {
        assert_eq!(render_sprintf("100%%", &[]), "100%");
    }

    #[test]
    fn test_base64_encode_of_string() {
        assert_eq!(base64_encode(Dynamic::from("hi")), "aGk=");
    }

    #[test]
    fn test_raise_with_extra_args_folds_into_message() {
        let err = raise_4(
            Dynamic::from("transient"),
            Dynamic::from("X"),
            Dynamic::from("boom"),
            Dynamic::from("extra"),
        )
        .unwrap_err();
        let EvalAltResult::ErrorRuntime(dynamic, _) = *err else {
            panic!("expected ErrorRuntime");
        };
        let Value::Object(map) = from_dynamic(&dynamic) else {
            panic!("expected object");
        };
        assert_eq!(map.get("code").and_then(Value::as_str), Some("X"));
        assert_eq!(map.get("message").and_then(Value::as_str), Some("boom extra"));
    }
}

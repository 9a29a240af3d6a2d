//! # Parser recursivo-descendente de `.flow`
//!
//! Produz um `Flow` a partir do texto fonte. O parser nunca interpreta o
//! conteúdo de um corpo de step: ele só sabe onde um bloco `{ ... }`
//! começa e termina (contando chaves, parênteses e strings), e devolve
//! esse conteúdo como texto opaco para a VM embutida executar depois.
//!
//! ## Para todos entenderem:
//!
//! É como separar um documento em seções usando só a pontuação (chaves e
//! parênteses), sem nunca ler o "significado" do texto dentro de cada
//! seção — isso é trabalho de outra parte do sistema (o bridge de script).

use super::ast::{Backoff, Entrypoint, Flow, RetryConfig, Step};
use super::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

static ENV_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^env\(\s*"([^"]+)"\s*(?:,\s*"([^"]*)"\s*)?\)$"#).expect("valid env() regex")
});

const TOP_LEVEL_KEYWORDS: [&str; 5] = ["entrypoint", "properties", "step", "on_error", "return"];

/// Parseia `source` (conteúdo de um arquivo `.flow`) produzindo um `Flow`
/// com o id dado (tipicamente o nome do arquivo sem a extensão `.flow`).
pub fn parse(id: impl Into<String>, source: &str) -> Result<Flow, ParseError> {
    let mut parser = Parser::new(source);
    parser.parse_flow(id.into())
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn err(&self, reason: impl Into<String>) -> ParseError {
        ParseError::new(self.pos, reason, self.src)
    }

    fn err_at(&self, offset: usize, reason: impl Into<String>) -> ParseError {
        ParseError::new(offset, reason, self.src)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    /// Pula espaços em branco e comentários `//` até o fim da linha.
    fn skip_ws_comments(&mut self) {
        loop {
            let bytes = self.src.as_bytes();
            while self.pos < bytes.len() && (bytes[self.pos] as char).is_whitespace() {
                self.pos += 1;
            }
            if self.rest().starts_with("//") {
                while self.pos < bytes.len() && bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    /// Lê um identificador `[A-Za-z_][A-Za-z0-9_]*` sem consumir nada caso
    /// não haja identificador na posição atual.
    fn peek_ident(&self) -> Option<&'a str> {
        let bytes = self.src.as_bytes();
        let start = self.pos;
        let mut end = start;
        if end >= bytes.len() || !(bytes[end].is_ascii_alphabetic() || bytes[end] == b'_') {
            return None;
        }
        end += 1;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
        Some(&self.src[start..end])
    }

    fn read_ident(&mut self) -> Result<String, ParseError> {
        let ident = self.peek_ident().ok_or_else(|| self.err("expected identifier"))?;
        self.pos += ident.len();
        Ok(ident.to_string())
    }

    fn expect_char(&mut self, c: char) -> Result<(), ParseError> {
        if self.peek_byte() == Some(c as u8) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.err(format!("expected '{c}'")))
        }
    }

    fn consume_str(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Lê um bloco delimitado por `{`/`}`, contando aninhamento e
    /// rastreando strings com escapes, e devolve o conteúdo interno
    /// (entre as chaves) já aparado de espaços nas bordas.
    fn read_braced_block(&mut self) -> Result<String, ParseError> {
        self.skip_ws_comments();
        let start = self.pos;
        self.expect_char('{')?;
        let inner_start = self.pos;
        let close = find_matching(self.src, self.pos, b'{', b'}')
            .ok_or_else(|| self.err_at(start, "unclosed '{'"))?;
        let inner = self.src[inner_start..close].trim().to_string();
        self.pos = close + 1;
        Ok(inner)
    }

    fn read_paren_block(&mut self) -> Result<String, ParseError> {
        self.skip_ws_comments();
        let start = self.pos;
        self.expect_char('(')?;
        let inner_start = self.pos;
        let close = find_matching(self.src, self.pos, b'(', b')')
            .ok_or_else(|| self.err_at(start, "unclosed '('"))?;
        let inner = self.src[inner_start..close].trim().to_string();
        self.pos = close + 1;
        Ok(inner)
    }

    fn parse_flow(&mut self, id: String) -> Result<Flow, ParseError> {
        let mut entrypoint: Option<Entrypoint> = None;
        let mut timeout_ms: u64 = 0;
        let mut properties: HashMap<String, Value> = HashMap::new();
        let mut steps: Vec<Step> = Vec::new();
        let mut on_error_body: Option<String> = None;
        let mut return_body: Option<String> = None;

        loop {
            self.skip_ws_comments();
            if self.at_eof() {
                break;
            }
            let keyword = self
                .peek_ident()
                .ok_or_else(|| self.err("expected a top-level keyword"))?;

            match keyword {
                "entrypoint" => {
                    if entrypoint.is_some() {
                        return Err(self.err("duplicate 'entrypoint' block"));
                    }
                    self.pos += "entrypoint".len();
                    self.expect_char('.')?;
                    let kind = self.read_ident()?;
                    let raw = self.read_braced_block()?;
                    let mut config = parse_option_map(&raw, self)?;
                    if let Some(Value::String(raw_timeout)) = config.get("timeout").cloned() {
                        timeout_ms = raw_timeout.parse().unwrap_or(0);
                        config.remove("timeout");
                    } else if let Some(value) = config.get("timeout").cloned() {
                        timeout_ms = value.as_u64().unwrap_or(0);
                        config.remove("timeout");
                    }
                    entrypoint = Some(Entrypoint { kind, config });
                }
                "properties" => {
                    if !properties.is_empty() {
                        return Err(self.err("duplicate 'properties' block"));
                    }
                    self.pos += "properties".len();
                    let raw = self.read_braced_block()?;
                    let map = parse_option_map(&raw, self)?;
                    for (key, value) in map {
                        properties.insert(key, rewrite_env_calls(value));
                    }
                }
                "step" => {
                    self.pos += "step".len();
                    self.skip_ws_comments();
                    let step = self.parse_step()?;
                    steps.push(step);
                }
                "on_error" => {
                    if on_error_body.is_some() {
                        return Err(self.err("duplicate 'on_error' block"));
                    }
                    self.pos += "on_error".len();
                    on_error_body = Some(self.read_braced_block()?);
                }
                "return" => {
                    if return_body.is_some() {
                        return Err(self.err("duplicate 'return' block"));
                    }
                    self.pos += "return".len();
                    return_body = Some(self.read_return_expression()?);
                }
                other => return Err(self.err(format!("unknown top-level keyword '{other}'"))),
            }
        }

        let entrypoint = entrypoint.unwrap_or(Entrypoint {
            kind: "default".to_string(),
            config: HashMap::new(),
        });

        validate_step_ids(&steps, self)?;

        Ok(Flow {
            id,
            entrypoint,
            timeout_ms,
            properties,
            steps,
            on_error_body,
            return_body,
        })
    }

    fn parse_step(&mut self) -> Result<Step, ParseError> {
        let id = self.read_ident()?;
        self.skip_ws_comments();

        let mut options: HashMap<String, Value> = HashMap::new();
        if self.peek_byte() == Some(b'(') {
            let raw = self.read_paren_block()?;
            options = parse_option_map(&raw, self)?;
        }

        self.skip_ws_comments();
        let body = self.read_braced_block()?;

        let condition = options.remove("condition").map(value_to_raw_string);
        let timeout_ms = options
            .remove("timeout")
            .map(|v| value_to_raw_string(v).parse().unwrap_or(0))
            .unwrap_or(0);
        let retry = match options.remove("retry") {
            Some(Value::Object(fields)) => Some(parse_retry_config(fields, self)?),
            Some(_) => return Err(self.err("'retry' option must be a map")),
            None => None,
        };

        let mut fallback_body = None;
        let mut compensate_body = None;
        for _ in 0..2 {
            self.skip_ws_comments();
            match self.peek_ident() {
                Some("fallback") if fallback_body.is_none() => {
                    self.pos += "fallback".len();
                    fallback_body = Some(self.read_braced_block()?);
                }
                Some("compensate") if compensate_body.is_none() => {
                    self.pos += "compensate".len();
                    compensate_body = Some(self.read_braced_block()?);
                }
                _ => break,
            }
        }

        Ok(Step {
            id,
            body,
            condition,
            timeout_ms,
            retry,
            fallback_body,
            compensate_body,
        })
    }

    /// Lê até o EOF, ou até uma quebra de linha em profundidade zero cujo
    /// próximo token seja uma palavra-chave de topo — sem consumir essa
    /// palavra-chave, que fica para a próxima iteração de `parse_flow`.
    fn read_return_expression(&mut self) -> Result<String, ParseError> {
        self.skip_ws_comments();
        let start = self.pos;
        let bytes = self.src.as_bytes();
        let mut depth: i32 = 0;
        let mut in_string: Option<u8> = None;
        let mut i = self.pos;
        let mut end = self.src.len();

        while i < bytes.len() {
            let b = bytes[i];
            if let Some(q) = in_string {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == q {
                    in_string = None;
                }
                i += 1;
                continue;
            }
            match b {
                b'"' | b'\'' | b'`' => {
                    in_string = Some(b);
                    i += 1;
                }
                b'[' | b'(' | b'{' => {
                    depth += 1;
                    i += 1;
                }
                b']' | b')' | b'}' => {
                    depth -= 1;
                    i += 1;
                }
                b'\n' if depth <= 0 => {
                    let mut lookahead = i + 1;
                    while lookahead < bytes.len() && (bytes[lookahead] as char).is_whitespace() {
                        lookahead += 1;
                    }
                    let lookahead_word = &self.src[lookahead..];
                    if TOP_LEVEL_KEYWORDS.iter().any(|kw| lookahead_word.starts_with(kw)) {
                        end = i;
                        break;
                    }
                    i += 1;
                }
                _ => i += 1,
            }
        }

        self.pos = end;
        Ok(self.src[start..end].trim().to_string())
    }
}

fn validate_step_ids(steps: &[Step], parser: &Parser) -> Result<(), ParseError> {
    let mut seen = std::collections::HashSet::new();
    for step in steps {
        if step.id == super::ast::RETURN_STEP_ID {
            return Err(parser.err(format!("step id '{}' is reserved", super::ast::RETURN_STEP_ID)));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(parser.err(format!("duplicate step id '{}'", step.id)));
        }
    }
    Ok(())
}

const LEGACY_RETRY_FIELDS: [&str; 2] = ["maxRetries", "condition"];
const VALID_RETRY_FIELDS: [&str; 7] = [
    "max_attempts",
    "delay",
    "backoff",
    "max_delay",
    "jitter",
    "when",
    "non_retryable",
];

fn parse_retry_config(fields: Map<String, Value>, parser: &Parser) -> Result<RetryConfig, ParseError> {
    for legacy in LEGACY_RETRY_FIELDS {
        if fields.contains_key(legacy) {
            return Err(parser.err(format!("unsupported retry field '{legacy}'")));
        }
    }
    for key in fields.keys() {
        if !VALID_RETRY_FIELDS.contains(&key.as_str()) {
            return Err(parser.err(format!("unsupported retry field '{key}'")));
        }
    }

    let mut retry = RetryConfig::default();
    if let Some(v) = fields.get("max_attempts") {
        retry.max_attempts = v.as_u64().unwrap_or(1).max(1) as u32;
    }
    if let Some(v) = fields.get("delay") {
        retry.delay_ms = v.as_u64().unwrap_or(0);
    }
    if let Some(v) = fields.get("backoff") {
        let raw = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
        retry.backoff =
            Backoff::parse(&raw).ok_or_else(|| parser.err(format!("invalid backoff value '{raw}'")))?;
    }
    if let Some(v) = fields.get("max_delay") {
        retry.max_delay_ms = v.as_u64().unwrap_or(0);
    }
    if let Some(v) = fields.get("jitter") {
        retry.jitter = v.as_bool().unwrap_or(false);
    }
    if let Some(v) = fields.get("when") {
        retry.when = Some(value_to_raw_string(v.clone()));
    }
    if let Some(Value::Array(items)) = fields.get("non_retryable") {
        retry.non_retryable = items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect();
    }

    Ok(retry)
}

fn value_to_raw_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Reescreve `env("NAME")` / `env("NAME", "default")` como placeholders
/// `${NAME}` / `${NAME:default}` para um substitutor de ambiente posterior.
fn rewrite_env_calls(value: Value) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = ENV_CALL_RE.captures(s.trim()) {
                let name = &caps[1];
                match caps.get(2) {
                    Some(default) => Value::String(format!("${{{name}:{}}}", default.as_str())),
                    None => Value::String(format!("${{{name}}}")),
                }
            } else {
                Value::String(s)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(rewrite_env_calls).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, rewrite_env_calls(v))).collect())
        }
        other => other,
    }
}

/// Encontra o byte logo após o caractere de fechamento correspondente ao
/// caractere de abertura já consumido em `after_open`, contando
/// aninhamento e ignorando conteúdo dentro de strings/comentários `//`.
fn find_matching(src: &str, after_open: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth: i32 = 1;
    let mut i = after_open;
    let mut in_string: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                in_string = None;
            }
            i += 1;
            continue;
        }
        if b == b'"' || b == b'\'' || b == b'`' {
            in_string = Some(b);
            i += 1;
            continue;
        }
        if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Divide `s` em entradas de topo separadas por vírgula ou quebra de
/// linha, respeitando aninhamento de `[]`, `()`, `{}` e conteúdo de
/// strings. Entradas vazias (espaços) são descartadas.
fn split_entries(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut entries = Vec::new();
    let mut start = 0usize;
    let mut depth: i32 = 0;
    let mut in_string: Option<u8> = None;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'\'' | b'`' => {
                in_string = Some(b);
                i += 1;
            }
            b'[' | b'(' | b'{' => {
                depth += 1;
                i += 1;
            }
            b']' | b')' | b'}' => {
                depth -= 1;
                i += 1;
            }
            b',' | b'\n' if depth <= 0 => {
                entries.push(&s[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    entries.push(&s[start..]);

    entries
        .into_iter()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect()
}

/// Encontra o primeiro `:` em profundidade zero, fora de strings — o
/// separador entre chave e valor de uma entrada de opção.
fn find_top_level_colon(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth: i32 = 0;
    let mut in_string: Option<u8> = None;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'\'' | b'`' => {
                in_string = Some(b);
                i += 1;
            }
            b'[' | b'(' | b'{' => {
                depth += 1;
                i += 1;
            }
            b']' | b')' | b'}' => {
                depth -= 1;
                i += 1;
            }
            b':' if depth == 0 => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Parseia o conteúdo interno de um bloco de opções (`key: value, ...`)
/// em um mapa JSON. Usado para `entrypoint.*`, `properties`, opções de
/// step entre parênteses, e mapas de opção aninhados como `retry: { ... }`.
fn parse_option_map(content: &str, parser: &Parser) -> Result<Map<String, Value>, ParseError> {
    let mut map = Map::new();
    for entry in split_entries(content) {
        let colon = find_top_level_colon(entry)
            .ok_or_else(|| parser.err(format!("missing ':' in option entry '{entry}'")))?;
        let key = entry[..colon].trim().to_string();
        let raw_value = entry[colon + 1..].trim();
        map.insert(key, parse_value_text(raw_value, parser)?);
    }
    Ok(map)
}

fn parse_value_text(raw: &str, parser: &Parser) -> Result<Value, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::String(String::new()));
    }

    let first = raw.as_bytes()[0];
    if first == b'"' || first == b'\'' || first == b'`' {
        return parse_quoted_string(raw, parser);
    }
    if first == b'[' {
        let inner = raw
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| parser.err(format!("unclosed '[' in value '{raw}'")))?;
        let items = split_entries(inner)
            .into_iter()
            .map(|item| parse_value_text(item, parser))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(items));
    }
    if first == b'{' {
        let inner = raw
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| parser.err(format!("unclosed '{{' in value '{raw}'")))?;
        return Ok(Value::Object(parse_option_map(inner, parser)?));
    }

    Ok(coerce_unquoted_token(raw))
}

fn parse_quoted_string(raw: &str, parser: &Parser) -> Result<Value, ParseError> {
    let quote = raw.as_bytes()[0];
    if raw.len() < 2 || *raw.as_bytes().last().unwrap() != quote {
        return Err(parser.err(format!("unterminated string literal '{raw}'")));
    }
    let body = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    Ok(Value::String(out))
}

/// Um token não citado é mantido como texto literal (necessário para
/// expressões como `a == 2` sobreviverem intactas), mas tokens que
/// parseiam de forma inequívoca como booleano ou número são convertidos,
/// para que consumidores como `RetryConfig` recebam tipos já prontos.
fn coerce_unquoted_token(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "nil" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_minimal_flow_with_return() {
        let src = r#"
            step a { 1 }
            step b(condition: a == 2) { 2 }
            return response.json({status: 200, body: {v: a}})
        "#;
        let flow = parse("demo", src).expect("parses");
        assert_eq!(flow.steps.len(), 2);
        assert_eq!(flow.steps[1].condition.as_deref(), Some("a == 2"));
        assert!(flow.return_body.unwrap().starts_with("response.json"));
    }

    #[test]
    fn test_option_array_with_comma_survives_as_single_condition_string() {
        let src = r#"step s(condition: x in ["a", "b"]) { 1 }"#;
        let flow = parse("demo", src).expect("parses");
        assert_eq!(flow.steps[0].condition.as_deref(), Some(r#"x in ["a", "b"]"#));
    }

    #[test]
    fn test_rejects_legacy_retry_field() {
        let src = r#"
            step s(retry: { maxRetries: 3 }) { 1 }
        "#;
        let err = parse("demo", src).unwrap_err();
        assert!(err.to_string().contains("unsupported retry field"));
    }

    #[test]
    fn test_retry_config_parsed_with_typed_fields() {
        let src = r#"
            step s(retry: { max_attempts: 3, delay: 100, backoff: exponential, jitter: true }) { 1 }
        "#;
        let flow = parse("demo", src).expect("parses");
        let retry = flow.steps[0].retry.as_ref().expect("retry present");
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.delay_ms, 100);
        assert_eq!(retry.backoff, Backoff::Exponential);
        assert!(retry.jitter);
    }

    #[test]
    fn test_entrypoint_timeout_lifted_to_flow() {
        let src = r#"
            entrypoint.http { timeout: 5000, method: GET }
            step s { 1 }
        "#;
        let flow = parse("demo", src).expect("parses");
        assert_eq!(flow.timeout_ms, 5000);
        assert!(!flow.entrypoint.config.contains_key("timeout"));
    }

    #[test]
    fn test_env_call_rewritten_in_properties() {
        let src = r#"
            properties { stage: env("STAGE", "dev") }
            step s { 1 }
        "#;
        let flow = parse("demo", src).expect("parses");
        assert_eq!(flow.properties.get("stage"), Some(&Value::String("${STAGE:dev}".into())));
    }

    #[test]
    fn test_step_with_fallback_and_compensate() {
        let src = r#"
            step s { 1 } fallback { 2 } compensate { 3 }
        "#;
        let flow = parse("demo", src).expect("parses");
        assert_eq!(flow.steps[0].fallback_body.as_deref(), Some("2"));
        assert_eq!(flow.steps[0].compensate_body.as_deref(), Some("3"));
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let src = "step a { 1 }\nstep a { 2 }";
        let err = parse("demo", src).unwrap_err();
        assert!(err.to_string().contains("duplicate step id"));
    }

    #[test]
    fn test_return_reserved_step_id_rejected() {
        let src = "step __return { 1 }";
        let err = parse("demo", src).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }
}

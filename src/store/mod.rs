//! # Módulo de Value Store
//!
//! Mapa raiz, aninhado e endereçável por dot-path, que guarda todo o
//! estado de uma execução: resultados de steps, propriedades promovidas,
//! dados de requisição.
//!
//! ## Para todos entenderem:
//!
//! Pense numa ficha de cadastro com campos que podem conter outras fichas
//! dentro. `Set("user.address.city", "SP")` cria (ou atualiza) a ficha
//! `user`, dentro dela a ficha `address`, e dentro dela o campo `city`.
//! `Get("user.address.city")` percorre o mesmo caminho de volta.
//!
//! Esta é a estrutura que o bridge de script (`crate::bridge`) expõe
//! como ambiente (globals) para a VM embutida.

use serde_json::{Map, Value};

/// Mapa raiz endereçável por caminho com pontos (`a.b.c`).
///
/// Internamente é só um `serde_json::Map<String, Value>`; a semântica de
/// dot-path vive inteiramente nos métodos abaixo.
#[derive(Debug, Default, Clone)]
pub struct ValueStore {
    root: Map<String, Value>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self { root: Map::new() }
    }

    /// Divide `path` em `.`, navega/cria mapas intermediários, e grava
    /// `value` no último segmento. Um intermediário que não seja mapa é
    /// substituído por um mapa novo vazio.
    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        set_recursive(&mut self.root, &segments, value);
    }

    /// Percorre `path`; retorna `(None)` em qualquer segmento ausente ou
    /// intermediário que não seja mapa. O booleano "found" da especificação
    /// corresponde a `Some`/`None` aqui.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments: Vec<&str> = path.split('.').collect();
        get_recursive(&self.root, &segments)
    }

    /// `Set(prefix, value)`; se `value` for um objeto, também expande
    /// recursivamente cada entrada como `prefix.chave`, de forma que todo
    /// subcaminho fique endereçável individualmente. Sequências são
    /// gravadas como um todo (não são "explodidas" por índice).
    pub fn set_nested(&mut self, prefix: &str, value: Value) {
        self.set(prefix, value.clone());
        if let Value::Object(map) = value {
            for (key, nested) in map {
                let child_path = format!("{prefix}.{key}");
                self.set_nested(&child_path, nested);
            }
        }
    }

    /// O mapa raiz, por referência (não é uma cópia).
    pub fn all(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn all_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.root
    }
}

fn set_recursive(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => unreachable!("path splits into at least one segment"),
        [last] => {
            map.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let child = entry.as_object_mut().expect("just ensured object");
            set_recursive(child, rest, value);
        }
    }
}

fn get_recursive<'a>(map: &'a Map<String, Value>, segments: &[&str]) -> Option<&'a Value> {
    match segments {
        [] => None,
        [last] => map.get(*last),
        [head, rest @ ..] => {
            let next = map.get(*head)?;
            let next_map = next.as_object()?;
            get_recursive(next_map, rest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_then_get_full_path() {
        let mut store = ValueStore::new();
        store.set("a.b.c", json!("v"));
        assert_eq!(store.get("a.b.c"), Some(&json!("v")));
    }

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut store = ValueStore::new();
        store.set("a.b.c", json!("v"));
        assert_eq!(store.get("a.b"), Some(&json!({"c": "v"})));
        assert_eq!(store.get("a"), Some(&json!({"b": {"c": "v"}})));
    }

    #[test]
    fn test_set_overwrites_non_map_intermediate() {
        let mut store = ValueStore::new();
        store.set("a", json!(1));
        store.set("a.b", json!(2));
        assert_eq!(store.get("a.b"), Some(&json!(2)));
        assert_eq!(store.get("a"), Some(&json!({"b": 2})));
    }

    #[test]
    fn test_get_missing_segment_is_none() {
        let store = ValueStore::new();
        assert_eq!(store.get("missing.path"), None);
    }

    #[test]
    fn test_get_through_non_map_intermediate_is_none() {
        let mut store = ValueStore::new();
        store.set("a", json!(1));
        assert_eq!(store.get("a.b"), None);
    }

    #[test]
    fn test_set_nested_expands_every_leaf() {
        let mut store = ValueStore::new();
        store.set_nested("s", json!({"row": {"id": "abc"}, "count": 2}));
        assert_eq!(store.get("s.row.id"), Some(&json!("abc")));
        assert_eq!(store.get("s.row"), Some(&json!({"id": "abc"})));
        assert_eq!(store.get("s.count"), Some(&json!(2)));
        assert_eq!(store.get("s"), Some(&json!({"row": {"id": "abc"}, "count": 2})));
    }

    #[test]
    fn test_set_nested_does_not_explode_sequences() {
        let mut store = ValueStore::new();
        store.set_nested("s", json!({"items": [1, 2, 3]}));
        assert_eq!(store.get("s.items"), Some(&json!([1, 2, 3])));
        assert_eq!(store.get("s.items.0"), None);
    }
}

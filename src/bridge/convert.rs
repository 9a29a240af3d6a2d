//! # Conversão de valores entre o host e a VM embutida
//!
//! Um único conversor recursivo por direção, como recomendado nas notas
//! de design: em vez de espalhar reflexão tipo-a-tipo pelos pontos de
//! chamada, toda a lógica de "o que isso vira do outro lado" mora aqui.
//!
//! ## Mapas "lenientes" de graça
//!
//! `rhai::Map` já trata `mapa.chave` como açúcar sintático para
//! `mapa["chave"]`, e indexar uma chave ausente devolve `()` em vez de
//! lançar erro. Isso é exatamente a semântica "leniente" pedida pela
//! especificação — então mapas de dados puros (sem funções) são
//! convertidos direto para `rhai::Map`, sem precisar de um tipo
//! encapsulador dedicado. Só mapas que **contêm funções de host**
//! (namespaces de plugin, `response`) precisam de um mecanismo diferente,
//! porque `rhai::Map` não guarda closures nativas de forma conveniente e
//! porque queremos que `get`/`keys` não fiquem sombreados pelos métodos
//! genéricos de mapa — esses viram módulos estáticos do Rhai
//! (`rhai::Module`, registrados via `Engine::register_static_module`).

use rhai::{Array, Dynamic, Map};
use serde_json::{Map as JsonMap, Number, Value};

/// Converte um `serde_json::Value` do host para um `Dynamic` da VM.
pub fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => number_to_dynamic(n),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => {
            let arr: Array = items.iter().map(to_dynamic).collect();
            Dynamic::from_array(arr)
        }
        Value::Object(map) => {
            let mut rhai_map = Map::new();
            for (k, v) in map {
                rhai_map.insert(k.into(), to_dynamic(v));
            }
            Dynamic::from_map(rhai_map)
        }
    }
}

fn number_to_dynamic(n: &Number) -> Dynamic {
    if let Some(i) = n.as_i64() {
        Dynamic::from(i)
    } else if let Some(f) = n.as_f64() {
        Dynamic::from(f)
    } else {
        Dynamic::from(n.to_string())
    }
}

/// Converte um `Dynamic` da VM de volta para um `serde_json::Value` do
/// host: mapas viram objetos (recursivamente), sequências viram arrays
/// (recursivamente), `()` vira `null`, escalares usam a extração nativa
/// da VM.
pub fn from_dynamic(value: &Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Value::Bool(b);
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return Value::from(i);
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        return serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null);
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return Value::String(s);
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        let mut json_map = JsonMap::new();
        for (k, v) in map {
            json_map.insert(k.to_string(), from_dynamic(&v));
        }
        return Value::Object(json_map);
    }
    if let Some(array) = value.clone().try_cast::<Array>() {
        return Value::Array(array.iter().map(from_dynamic).collect());
    }
    // Fallback: usa a representação textual da VM para qualquer tipo
    // exótico que não caiu em nenhum dos casos acima.
    Value::String(value.to_string())
}

/// Atalho: converte um mapa JSON (`serde_json::Map`) inteiro para `rhai::Map`.
pub fn json_map_to_rhai(map: &JsonMap<String, Value>) -> Map {
    let mut rhai_map = Map::new();
    for (k, v) in map {
        rhai_map.insert(k.into(), to_dynamic(v));
    }
    rhai_map
}

/// Atalho: converte um `rhai::Map` para um mapa JSON, usado ao extrair
/// argumentos recebidos por funções de host (plugins, response handlers).
pub fn rhai_map_to_json(map: &Map) -> JsonMap<String, Value> {
    let mut json_map = JsonMap::new();
    for (k, v) in map {
        json_map.insert(k.to_string(), from_dynamic(v));
    }
    json_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_nested_object() {
        let original = json!({"row": {"id": "abc", "count": 2, "tags": ["a", "b"]}});
        let dynamic = to_dynamic(&original);
        let back = from_dynamic(&dynamic);
        assert_eq!(original, back);
    }

    #[test]
    fn test_null_roundtrip() {
        let dynamic = to_dynamic(&Value::Null);
        assert!(dynamic.is_unit());
        assert_eq!(from_dynamic(&dynamic), Value::Null);
    }
}

//! # Módulo de Loader: leitura de um único arquivo `.flow`
//!
//! Descoberta de arquivos `.flow` por uma árvore de diretórios fica fora
//! do núcleo (§1); este módulo cobre só o caso de uso imediato da CLI —
//! ler um caminho específico e parseá-lo, derivando o `id` do flow do
//! nome do arquivo sem extensão.

use crate::dsl::{self, Flow, ParseError};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read flow file '{path}': {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Lê `path`, deriva o id do flow do stem do nome de arquivo, e parseia
/// o conteúdo via `dsl::parse`.
pub fn load_flow_file(path: impl AsRef<Path>) -> Result<Flow, LoadError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "flow".to_string());
    Ok(dsl::parse(id, &source)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_and_derives_id_from_filename() {
        let path = std::env::temp_dir().join("flowcore_loader_test_checkout.flow");
        std::fs::write(&path, "step a { 1 }").expect("writes fixture");
        let flow = load_flow_file(&path).expect("loads");
        assert_eq!(flow.id, "flowcore_loader_test_checkout");
        assert_eq!(flow.steps.len(), 1);
        std::fs::remove_file(&path).ok();
    }
}

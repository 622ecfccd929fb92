//! Prompt file loading

use crate::error::RunError;
use comfy_graph::PromptPair;
use std::path::Path;

/// Load `{"positive": ..., "negative": ...}` from a JSON file
pub fn load_prompt_pair(path: &Path) -> Result<PromptPair, RunError> {
    let bytes = std::fs::read(path).map_err(|e| RunError::io_error(path, e))?;
    let pair: PromptPair = serde_json::from_slice(&bytes).map_err(|e| RunError::PromptFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    tracing::debug!(
        "Loaded prompts from {} ({} / {} chars)",
        path.display(),
        pair.positive.len(),
        pair.negative.len()
    );
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_both_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(&path, r#"{"positive": "a man", "negative": "bad hands", "note": 1}"#).unwrap();

        let pair = load_prompt_pair(&path).unwrap();
        assert_eq!(pair, PromptPair::new("a man", "bad hands"));
    }

    #[test]
    fn missing_field_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(&path, r#"{"positive": "a man"}"#).unwrap();

        match load_prompt_pair(&path).unwrap_err() {
            RunError::PromptFile { path: failed, reason } => {
                assert_eq!(failed, path);
                assert!(reason.contains("negative"));
            }
            other => panic!("expected prompt file error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io() {
        let err = load_prompt_pair(Path::new("/nonexistent/prompts.json")).unwrap_err();
        assert!(matches!(err, RunError::Io { .. }));
    }
}

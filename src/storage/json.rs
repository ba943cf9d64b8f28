//! Single-file JSON storage backend
//!
//! The whole state is one JSON document. Saves write and fsync a sibling
//! temp file, then rename it over the target, so readers only ever see a
//! complete document.

use super::traits::{CodebookState, CodebookStore, StorageResult, StoredState};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Codebook store backed by one JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "codebook.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CodebookStore for JsonFileStore {
    fn load(&self) -> StorageResult<CodebookState> {
        if !self.path.exists() {
            return Ok(CodebookState::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let stored: StoredState = serde_json::from_str(&text)?;
        CodebookState::from_stored(stored)
    }

    fn save(&self, state: &CodebookState) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&state.to_stored())?;
        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            // data must be on disk before the rename makes it visible
            file.sync_all()?;
        }
        std::fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), codes = state.codebook.len(), "saved codebook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("codebook.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("out").join("codebook.json"));

        let mut state = CodebookState::new();
        let id = state.codebook.create("travel", "F1", vec![0.5, 0.5]).unwrap();
        state.ledger.record("F1", "travel", id);
        state.label_cache.insert("travel".to_string(), vec![0.5, 0.5]);
        store.save(&state).unwrap();

        assert!(!store.temp_path().exists(), "temp file is renamed away");
        let loaded = store.load().unwrap();
        assert_eq!(loaded.to_stored(), state.to_stored());
    }

    #[test]
    fn save_replaces_document_and_stale_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("codebook.json"));

        let mut state = CodebookState::new();
        let id = state.codebook.create("travel", "F1", vec![0.5, 0.5]).unwrap();
        state.ledger.record("F1", "travel", id);
        store.save(&state).unwrap();

        // leftover from a save that died before its rename
        std::fs::write(store.temp_path(), "{\"format_version\": 1, \"next_id").unwrap();

        state.codebook.create("budget", "F2", vec![0.1, 0.9]).unwrap();
        store.save(&state).unwrap();

        assert!(!store.temp_path().exists());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.codebook.len(), 2);
        assert_eq!(loaded.to_stored(), state.to_stored());
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codebook.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(path);
        assert!(matches!(store.load(), Err(StorageError::Serialization(_))));
    }
}

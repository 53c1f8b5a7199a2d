//! JSON record-list pattern store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{PatternStore, StorageError, SCHEMA_VERSION};
use crate::types::AnomalyPattern;

#[derive(Serialize, Deserialize)]
struct PatternFile {
    schema_version: u32,
    patterns: Vec<AnomalyPattern>,
}

/// Stores the whole library as one pretty-printed JSON document.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous library intact.
pub struct JsonPatternStore {
    path: PathBuf,
}

impl JsonPatternStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PatternStore for JsonPatternStore {
    fn load(&self) -> Result<Option<Vec<AnomalyPattern>>, StorageError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(j) => j,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No pattern library file found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let file: PatternFile = serde_json::from_str(&json)?;
        if file.schema_version != SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                found: file.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        info!(
            path = %self.path.display(),
            patterns = file.patterns.len(),
            "Pattern library loaded"
        );
        Ok(Some(file.patterns))
    }

    fn save(&self, patterns: &[AnomalyPattern]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = PatternFile {
            schema_version: SCHEMA_VERSION,
            patterns: patterns.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        info!(
            path = %self.path.display(),
            patterns = patterns.len(),
            "Pattern library saved"
        );
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::pattern;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPatternStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPatternStore::new(dir.path().join("nested/dir/patterns.json"));
        let patterns = vec![pattern("pat-0", true), pattern("pat-1", false)];
        store.save(&patterns).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, patterns);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_schema_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(&path, r#"{"schema_version": 99, "patterns": []}"#).unwrap();
        let err = JsonPatternStore::new(&path).load().unwrap_err();
        assert!(matches!(
            err,
            StorageError::SchemaMismatch { found: 99, expected: SCHEMA_VERSION }
        ));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonPatternStore::new(&path).load(),
            Err(StorageError::Serialization(_))
        ));
    }
}

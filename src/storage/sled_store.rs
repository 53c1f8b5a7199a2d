//! sled-backed pattern store

use sled::Db;
use std::path::Path;
use tracing::debug;

use super::{PatternStore, StorageError, SCHEMA_VERSION};
use crate::types::AnomalyPattern;

const PATTERNS_TREE: &str = "patterns";
const SCHEMA_KEY: &[u8] = b"schema_version";

/// One sled entry per pattern in the `patterns` tree, keyed by big-endian
/// position so iteration returns library order. The schema version lives
/// in the default tree.
pub struct SledPatternStore {
    db: Db,
}

impl SledPatternStore {
    /// Open or create the pattern database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn schema_version(&self) -> Result<Option<u32>, StorageError> {
        Ok(self.db.get(SCHEMA_KEY)?.and_then(|v| {
            let bytes: [u8; 4] = v.as_ref().try_into().ok()?;
            Some(u32::from_be_bytes(bytes))
        }))
    }
}

impl PatternStore for SledPatternStore {
    fn load(&self) -> Result<Option<Vec<AnomalyPattern>>, StorageError> {
        let Some(found) = self.schema_version()? else {
            return Ok(None);
        };
        if found != SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                found,
                expected: SCHEMA_VERSION,
            });
        }

        let tree = self.db.open_tree(PATTERNS_TREE)?;
        let mut patterns = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, value) = entry?;
            patterns.push(serde_json::from_slice::<AnomalyPattern>(&value)?);
        }
        debug!(patterns = patterns.len(), "Pattern library loaded from sled");
        Ok(Some(patterns))
    }

    fn save(&self, patterns: &[AnomalyPattern]) -> Result<(), StorageError> {
        let tree = self.db.open_tree(PATTERNS_TREE)?;
        let mut batch = sled::Batch::default();
        for key in tree.iter().keys() {
            batch.remove(key?);
        }
        for (position, p) in patterns.iter().enumerate() {
            batch.insert(&(position as u64).to_be_bytes()[..], serde_json::to_vec(p)?);
        }
        tree.apply_batch(batch)?;
        self.db.insert(SCHEMA_KEY, &SCHEMA_VERSION.to_be_bytes()[..])?;
        self.db.flush()?;
        debug!(patterns = patterns.len(), "Pattern library saved to sled");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

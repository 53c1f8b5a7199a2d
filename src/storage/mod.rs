//! Pattern persistence
//!
//! The anomaly pattern library is the only durable state the engine keeps.
//! `PatternStore` abstracts where it lives so backends can be swapped
//! without touching the coordinator:
//!
//! - `JsonPatternStore`: one JSON record list with a schema version (default)
//! - `SledPatternStore`: embedded sled database, one key per pattern
//! - `InMemoryPatternStore`: not durable; tests and throwaway runs

mod json;
mod memory;
mod sled_store;

pub use json::JsonPatternStore;
pub use memory::InMemoryPatternStore;
pub use sled_store::SledPatternStore;

use crate::config::{StorageBackend, StorageConfig};
use crate::types::AnomalyPattern;

/// Schema version for persisted pattern libraries.
pub const SCHEMA_VERSION: u32 = 1;

/// Trait for pluggable pattern-library backends.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait PatternStore: Send + Sync {
    /// Load the persisted library. `Ok(None)` means nothing has been saved yet.
    fn load(&self) -> Result<Option<Vec<AnomalyPattern>>, StorageError>;

    /// Replace the persisted library with `patterns`.
    fn save(&self, patterns: &[AnomalyPattern]) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Schema version mismatch: store has v{found}, expected v{expected}")]
    SchemaMismatch { found: u32, expected: u32 },
}

/// Open the backend selected in config.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn PatternStore>, StorageError> {
    Ok(match config.backend {
        StorageBackend::Json => Box::new(JsonPatternStore::new(&config.path)),
        StorageBackend::Sled => Box::new(SledPatternStore::open(&config.path)?),
        StorageBackend::Memory => Box::new(InMemoryPatternStore::new()),
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_store_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let json = open_store(&StorageConfig {
            backend: StorageBackend::Json,
            path: dir.path().join("p.json").display().to_string(),
        })
        .unwrap();
        assert_eq!(json.backend_name(), "json");

        let sled = open_store(&StorageConfig {
            backend: StorageBackend::Sled,
            path: dir.path().join("db").display().to_string(),
        })
        .unwrap();
        assert_eq!(sled.backend_name(), "sled");

        let mem = open_store(&StorageConfig {
            backend: StorageBackend::Memory,
            path: String::new(),
        })
        .unwrap();
        assert_eq!(mem.backend_name(), "memory");
    }
}

//! In-memory pattern store

use std::sync::RwLock;

use super::{PatternStore, StorageError};
use crate::types::AnomalyPattern;

/// Thread-safe via `RwLock`. Not durable, data is lost on restart.
#[derive(Default)]
pub struct InMemoryPatternStore {
    patterns: RwLock<Option<Vec<AnomalyPattern>>>,
}

impl InMemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatternStore for InMemoryPatternStore {
    fn load(&self) -> Result<Option<Vec<AnomalyPattern>>, StorageError> {
        Ok(self
            .patterns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn save(&self, patterns: &[AnomalyPattern]) -> Result<(), StorageError> {
        *self.patterns.write().unwrap_or_else(|e| e.into_inner()) = Some(patterns.to_vec());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

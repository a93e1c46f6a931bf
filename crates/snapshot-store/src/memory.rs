//! In-memory artifact storage.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::store::{SnapshotStore, StoreError};

/// Keeps artifacts in a map; nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    artifacts: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all stored artifacts, sorted.
    pub fn artifact_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map still holds whole artifacts; writers never leave partial entries.
        self.artifacts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn put_artifact(&self, name: &str, contents: Vec<u8>) -> Result<(), StoreError> {
        self.lock().insert(name.to_string(), contents);
        Ok(())
    }

    async fn get_artifact(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock().get(name).cloned())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

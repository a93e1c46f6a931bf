//! Filesystem-based artifact storage implementation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::store::{SnapshotStore, StoreError};

/// Filesystem implementation of SnapshotStore trait.
///
/// Stores each artifact as a JSON file in a directory. Files are written
/// to a `.partial` sibling first and renamed into place, so a reader never
/// sees a half-written snapshot.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl SnapshotStore for FilesystemStore {
    async fn put_artifact(&self, name: &str, contents: Vec<u8>) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;

        let path = self.dir.join(name);
        let partial = self.dir.join(format!("{name}.partial"));

        std::fs::write(&partial, contents).map_err(|e| Self::io_error(&partial, e))?;
        std::fs::rename(&partial, &path).map_err(|e| Self::io_error(&path, e))?;

        tracing::debug!("Stored artifact {}", path.display());
        Ok(())
    }

    async fn get_artifact(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

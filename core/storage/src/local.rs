//! Local filesystem content store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::provider::{content_id_for, ContentStore, CONTENT_ID_PREFIX};
use ledgervault_common::{ContentId, Error, Result};

/// Local filesystem content store.
///
/// Stores each blob as one file named by its content id under the root
/// directory. Writes go to a temporary file first and are renamed into
/// place, so a crash never leaves a partially written blob under a valid id.
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a content id to a filesystem path.
    fn to_fs_path(&self, id: &ContentId) -> Result<PathBuf> {
        let name = id.as_str();
        let valid = name.starts_with(CONTENT_ID_PREFIX)
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::Validation(format!("Malformed content id: {}", id)));
        }
        Ok(self.root.join(name))
    }
}

fn storage_err(err: std::io::Error) -> Error {
    Error::Storage(err.to_string())
}

#[async_trait]
impl ContentStore for LocalContentStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, data: Vec<u8>) -> Result<ContentId> {
        let id = content_id_for(&data);
        let fs_path = self.to_fs_path(&id)?;

        if fs::try_exists(&fs_path).await.map_err(storage_err)? {
            debug!(content_id = %id, "Blob already present");
            return Ok(id);
        }

        let tmp_path = self
            .root
            .join(format!(".{}.{}.tmp", id.as_str(), uuid::Uuid::new_v4()));
        fs::write(&tmp_path, &data).await.map_err(storage_err)?;
        fs::rename(&tmp_path, &fs_path).await.map_err(storage_err)?;

        debug!(content_id = %id, size = data.len(), "Blob stored");
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(id)?;

        match fs::read(&fs_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Content not found: {}", id)))
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn exists(&self, id: &ContentId) -> Result<bool> {
        let fs_path = self.to_fs_path(id)?;
        fs::try_exists(&fs_path).await.map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_put_get() {
        let temp = TempDir::new().unwrap();
        let store = LocalContentStore::new(temp.path()).unwrap();

        let id = store.put(b"Hello, Local!".to_vec()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), b"Hello, Local!");
        assert!(temp.path().join(id.as_str()).exists());
    }

    #[tokio::test]
    async fn test_local_put_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = LocalContentStore::new(temp.path()).unwrap();

        let id1 = store.put(vec![7; 100]).await.unwrap();
        let id2 = store.put(vec![7; 100]).await.unwrap();
        assert_eq!(id1, id2);

        let files = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_local_missing_and_malformed() {
        let temp = TempDir::new().unwrap();
        let store = LocalContentStore::new(temp.path()).unwrap();

        let missing = content_id_for(b"absent");
        assert!(matches!(store.get(&missing).await, Err(Error::NotFound(_))));

        let traversal = ContentId::new("../etc/passwd").unwrap();
        assert!(matches!(
            store.get(&traversal).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_local_creates_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested").join("blobs");
        let store = LocalContentStore::new(&root).unwrap();

        assert!(root.is_dir());
        assert_eq!(store.root(), root.as_path());
    }
}

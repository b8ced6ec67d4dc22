//! In-memory content store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::provider::{content_id_for, ContentStore};
use ledgervault_common::{ContentId, Error, Result};

/// In-memory content store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    blobs: Arc<RwLock<HashMap<ContentId, Vec<u8>>>>,
}

impl MemoryContentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs stored.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Check if the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> Error {
    Error::Storage("Memory store lock poisoned".to_string())
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, data: Vec<u8>) -> Result<ContentId> {
        let id = content_id_for(&data);
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        if !blobs.contains_key(&id) {
            debug!(content_id = %id, size = data.len(), "Storing blob");
            blobs.insert(id.clone(), data);
        }
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        blobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Content not found: {}", id)))
    }

    async fn exists(&self, id: &ContentId) -> Result<bool> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryContentStore::new();
        let id = store.put(b"Hello, World!".to_vec()).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap(), b"Hello, World!");
        assert!(store.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryContentStore::new();
        let id1 = store.put(vec![1, 2, 3]).await.unwrap();
        let id2 = store.put(vec![1, 2, 3]).await.unwrap();

        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryContentStore::new();
        let missing = content_id_for(b"never stored");

        assert!(matches!(store.get(&missing).await, Err(Error::NotFound(_))));
        assert!(!store.exists(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryContentStore::new();
        let other = store.clone();
        let id = store.put(b"shared".to_vec()).await.unwrap();

        assert_eq!(other.get(&id).await.unwrap(), b"shared");
    }
}

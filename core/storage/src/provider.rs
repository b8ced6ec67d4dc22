//! Content store and ledger trait definitions.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use ledgervault_common::{ContentId, Result, TxRef};
use ledgervault_crypto::IdentitySecret;

/// Prefix marking BLAKE2b-256 content ids.
pub const CONTENT_ID_PREFIX: &str = "b2-";

/// Compute the content id of a byte string.
///
/// Deterministic: identical bytes always map to the identical id.
pub fn content_id_for(data: &[u8]) -> ContentId {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    let digest = hasher.finalize();

    // The prefix makes the id non-empty, so construction cannot fail.
    ContentId::new(format!("{}{}", CONTENT_ID_PREFIX, URL_SAFE_NO_PAD.encode(digest)))
        .expect("prefixed content id is never empty")
}

/// Content-addressable blob storage.
///
/// Implementations must be idempotent on `put`: storing the same bytes
/// twice returns the same id and leaves a single copy.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Store a blob and return its content id.
    ///
    /// # Errors
    /// - `Error::Storage` if the store is unavailable
    async fn put(&self, data: Vec<u8>) -> Result<ContentId>;

    /// Fetch a blob by content id.
    ///
    /// # Errors
    /// - `Error::NotFound` if no blob has that id
    /// - `Error::Storage` if the store is unavailable
    async fn get(&self, id: &ContentId) -> Result<Vec<u8>>;

    /// Check whether a blob exists.
    async fn exists(&self, id: &ContentId) -> Result<bool>;
}

/// Append-only public ledger.
///
/// Not idempotent: anchoring the same content id twice yields two distinct
/// transaction references.
#[async_trait]
pub trait LedgerAnchor: Send + Sync {
    /// Get the ledger name.
    fn name(&self) -> &str;

    /// Submit `content_id`, signed by `identity`, and return the transaction reference.
    ///
    /// # Errors
    /// - `Error::Anchor` on submission failure
    async fn anchor(&self, identity: &IdentitySecret, content_id: &ContentId) -> Result<TxRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_deterministic() {
        let a = content_id_for(b"ciphertext");
        let b = content_id_for(b"ciphertext");
        let c = content_id_for(b"other");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with(CONTENT_ID_PREFIX));
    }

    #[test]
    fn test_content_id_is_path_safe() {
        let id = content_id_for(&[0xFFu8; 64]);
        assert!(!id.as_str().contains('/'));
        assert!(!id.as_str().contains('+'));
    }
}

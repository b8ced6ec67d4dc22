//! Ledger anchor implementations.
//!
//! Both ledgers verify the identity signature over the content id before
//! appending, and issue a fresh transaction reference for every submission,
//! even when the same content id was anchored before.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::provider::LedgerAnchor;
use ledgervault_common::{ContentId, Error, Result, TxRef};
use ledgervault_crypto::{IdentitySecret, PublicKey};

/// One appended ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
    /// Transaction reference.
    pub tx_ref: TxRef,
    /// Anchored content id.
    pub content_id: ContentId,
    /// Signer public key (URL-safe base64).
    pub signer: String,
    /// Signature over the content id (URL-safe base64).
    pub signature: String,
    /// When the record was appended.
    pub anchored_at: DateTime<Utc>,
}

impl AnchorRecord {
    /// Sign and build a record for `content_id`.
    pub fn new(identity: &IdentitySecret, content_id: &ContentId) -> Self {
        let signature = identity.sign(content_id.as_str().as_bytes());
        Self {
            tx_ref: TxRef::new(Uuid::new_v4().to_string()),
            content_id: content_id.clone(),
            signer: identity.public_key().to_base64(),
            signature: URL_SAFE_NO_PAD.encode(signature),
            anchored_at: Utc::now(),
        }
    }

    /// Verify the record's signature against its signer key.
    pub fn verify(&self) -> Result<()> {
        let signer = PublicKey::from_base64(&self.signer)
            .map_err(|e| Error::Anchor(format!("Invalid signer: {}", e)))?;
        let signature = URL_SAFE_NO_PAD
            .decode(&self.signature)
            .map_err(|_| Error::Anchor("Malformed signature encoding".to_string()))?;
        signer
            .verify(self.content_id.as_str().as_bytes(), &signature)
            .map_err(|e| Error::Anchor(e.to_string()))
    }
}

/// In-memory append-only ledger.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    records: Arc<RwLock<Vec<AnchorRecord>>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all appended records, oldest first.
    pub fn records(&self) -> Vec<AnchorRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of appended records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Check if nothing has been anchored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerAnchor for MemoryLedger {
    fn name(&self) -> &str {
        "memory"
    }

    async fn anchor(&self, identity: &IdentitySecret, content_id: &ContentId) -> Result<TxRef> {
        let record = AnchorRecord::new(identity, content_id);
        record.verify()?;

        let tx_ref = record.tx_ref.clone();
        self.records
            .write()
            .map_err(|_| Error::Anchor("Ledger lock poisoned".to_string()))?
            .push(record);

        info!(content_id = %content_id, tx_ref = %tx_ref, "Content anchored");
        Ok(tx_ref)
    }
}

/// File-backed append-only ledger, one JSON record per line.
pub struct FileLedger {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl FileLedger {
    /// Open (or lazily create) a ledger file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            append_lock: Mutex::new(()),
        })
    }

    /// Read every record in append order.
    pub async fn records(&self) -> Result<Vec<AnchorRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }
}

#[async_trait]
impl LedgerAnchor for FileLedger {
    fn name(&self) -> &str {
        "file"
    }

    async fn anchor(&self, identity: &IdentitySecret, content_id: &ContentId) -> Result<TxRef> {
        let record = AnchorRecord::new(identity, content_id);
        record.verify()?;

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Anchor(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| Error::Anchor(e.to_string()))?;
        file.sync_data()
            .await
            .map_err(|e| Error::Anchor(e.to_string()))?;

        info!(content_id = %content_id, tx_ref = %record.tx_ref, "Content anchored");
        Ok(record.tx_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::content_id_for;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_anchor_not_idempotent() {
        let ledger = MemoryLedger::new();
        let identity = IdentitySecret::generate();
        let id = content_id_for(b"blob");

        let tx1 = ledger.anchor(&identity, &id).await.unwrap();
        let tx2 = ledger.anchor(&identity, &id).await.unwrap();

        assert_ne!(tx1, tx2);
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_records_are_signed_by_identity() {
        let ledger = MemoryLedger::new();
        let identity = IdentitySecret::generate();
        let id = content_id_for(b"blob");
        ledger.anchor(&identity, &id).await.unwrap();

        let record = &ledger.records()[0];
        assert_eq!(record.signer, identity.public_key().to_base64());
        assert!(record.verify().is_ok());
    }

    #[test]
    fn test_forged_record_fails_verification() {
        let identity = IdentitySecret::generate();
        let mut record = AnchorRecord::new(&identity, &content_id_for(b"a"));
        record.content_id = content_id_for(b"b");

        assert!(matches!(record.verify(), Err(Error::Anchor(_))));
    }

    #[tokio::test]
    async fn test_file_ledger_appends_lines() {
        let temp = TempDir::new().unwrap();
        let ledger = FileLedger::new(temp.path().join("ledger").join("anchors.jsonl")).unwrap();
        let identity = IdentitySecret::generate();

        assert!(ledger.records().await.unwrap().is_empty());

        let tx1 = ledger.anchor(&identity, &content_id_for(b"one")).await.unwrap();
        let tx2 = ledger.anchor(&identity, &content_id_for(b"two")).await.unwrap();

        let records = ledger.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tx_ref, tx1);
        assert_eq!(records[1].tx_ref, tx2);
    }
}

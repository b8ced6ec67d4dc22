//! Durable metadata and session repository contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::payload::DEFAULT_VAULT_NAME;
use crate::session::SessionSnapshot;
use ledgervault_common::{ContentId, Error, Result, TxRef, UserId};

/// Vault type recorded for personal vaults.
pub const PERSONAL_VAULT_TYPE: &str = "personal";

/// Durable pointer from a user to their latest committed vault content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub vault_type: String,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Latest committed blob; `None` until the first sync.
    #[serde(rename = "contentID")]
    pub content_id: Option<ContentId>,
    pub anchor_ref: Option<TxRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultRecord {
    /// New, never-committed personal vault for `user_id`.
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: DEFAULT_VAULT_NAME.to_string(),
            vault_type: PERSONAL_VAULT_TYPE.to_string(),
            user_id,
            content_id: None,
            anchor_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same vault identity pointing at newly committed content.
    pub fn committed(&self, content_id: ContentId, anchor_ref: TxRef) -> Self {
        Self {
            content_id: Some(content_id),
            anchor_ref: Some(anchor_ref),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Vault metadata persistence.
#[async_trait]
pub trait VaultRepository: Send + Sync {
    /// Most recently updated vault record for `user_id`.
    async fn get_latest_by_user_id(&self, user_id: &UserId) -> Result<Option<VaultRecord>>;

    /// Insert or replace a record by id.
    async fn save_vault(&self, record: &VaultRecord) -> Result<()>;
}

/// Session snapshot persistence.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save_session(&self, user_id: &UserId, snapshot: &SessionSnapshot) -> Result<()>;

    async fn get_session(&self, user_id: &UserId) -> Result<Option<SessionSnapshot>>;

    /// Every stored snapshot, used at startup.
    async fn get_all_sessions(&self) -> Result<HashMap<UserId, SessionSnapshot>>;
}

fn poisoned() -> Error {
    Error::Database("Repository lock poisoned".to_string())
}

/// In-memory vault metadata repository.
#[derive(Default)]
pub struct MemoryVaultRepository {
    records: RwLock<HashMap<String, VaultRecord>>,
}

impl MemoryVaultRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VaultRepository for MemoryVaultRepository {
    async fn get_latest_by_user_id(&self, user_id: &UserId) -> Result<Option<VaultRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .values()
            .filter(|r| &r.user_id == user_id)
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn save_vault(&self, record: &VaultRecord) -> Result<()> {
        self.records
            .write()
            .map_err(|_| poisoned())?
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}

/// In-memory session repository.
#[derive(Default)]
pub struct MemorySessionRepository {
    snapshots: RwLock<HashMap<UserId, SessionSnapshot>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn save_session(&self, user_id: &UserId, snapshot: &SessionSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .map_err(|_| poisoned())?
            .insert(user_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get_session(&self, user_id: &UserId) -> Result<Option<SessionSnapshot>> {
        let snapshots = self.snapshots.read().map_err(|_| poisoned())?;
        Ok(snapshots.get(user_id).cloned())
    }

    async fn get_all_sessions(&self) -> Result<HashMap<UserId, SessionSnapshot>> {
        let snapshots = self.snapshots.read().map_err(|_| poisoned())?;
        Ok(snapshots.clone())
    }
}

//! Vault application service.
//!
//! Ties the pieces together for one process:
//! - CRUD goes registry handler → `SessionManager::update_vault` → signed
//!   envelope handed to the pending-commit worker
//! - `open_vault` fetches, decrypts and attaches the latest committed blob
//! - `sync` runs the commit pipeline
//!
//! Audit delivery never fails a mutation. Envelopes that cannot be signed or
//! sent are logged and left to the worker.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::HttpAuditClient;
use crate::config::{AppConfig, LedgerKind};
use crate::sqlite::SqliteRepository;
use ledgervault_common::{ContentId, Error, Result, SensitiveBytes, UserId};
use ledgervault_crypto::{
    recover_vault_password, wrap_vault_password, IdentitySecret, PasswordCipher, WrappedSecret,
};
use ledgervault_storage::{
    create_default_registry, ContentStore, FileLedger, LedgerAnchor, MemoryLedger,
};
use ledgervault_sync::{
    AuditClient, PendingCommitWorker, PipelineConfig, ProgressSink, SyncError, SyncOutcome,
    SyncPipeline,
};
use ledgervault_vault::{
    CommitEnvelope, CommitTarget, Entry, EntryKind, EntryMutation, EntryRegistry, Folder,
    MutationAction, RuntimeContext, SessionManager, SessionRepository, SessionState,
    VaultPayload, VaultRecord, VaultRepository,
};

/// Externally visible summary of a user's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub dirty: bool,
    pub last_content_id: Option<ContentId>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub entries: usize,
    pub pending_commits: usize,
}

/// Front door for vault operations.
pub struct VaultService {
    registry: EntryRegistry,
    sessions: Arc<SessionManager>,
    vaults: Arc<dyn VaultRepository>,
    store: Arc<dyn ContentStore>,
    cipher: PasswordCipher,
    pipeline: SyncPipeline,
    worker: Arc<PendingCommitWorker>,
    target: CommitTarget,
}

impl VaultService {
    pub fn new(
        sessions: Arc<SessionManager>,
        vaults: Arc<dyn VaultRepository>,
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerAnchor>,
        cipher: PasswordCipher,
        worker: Arc<PendingCommitWorker>,
    ) -> Self {
        let pipeline = SyncPipeline::new(
            sessions.clone(),
            cipher.clone(),
            store.clone(),
            ledger,
            vaults.clone(),
        );
        Self {
            registry: EntryRegistry::with_defaults(),
            sessions,
            vaults,
            store,
            cipher,
            pipeline,
            worker,
            target: CommitTarget::default(),
        }
    }

    /// Wire every component from configuration.
    ///
    /// # Errors
    /// - `Database` if the SQLite file cannot be opened
    /// - `Validation` for an unknown store provider or a file ledger without a path
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let repository = Arc::new(match &config.database_path {
            Some(path) => SqliteRepository::open(path)?,
            None => SqliteRepository::in_memory()?,
        });

        let store = create_default_registry()
            .resolve(&config.storage.provider, config.storage.config.clone())?;

        let ledger: Arc<dyn LedgerAnchor> = match config.ledger.kind {
            LedgerKind::Memory => Arc::new(MemoryLedger::new()),
            LedgerKind::File => {
                let path = config.ledger.path.as_ref().ok_or_else(|| {
                    Error::Validation("File ledger requires a path".to_string())
                })?;
                Arc::new(FileLedger::new(path)?)
            }
        };

        let audit: Option<Arc<dyn AuditClient>> = match &config.audit.endpoint {
            Some(endpoint) => Some(Arc::new(HttpAuditClient::new(
                endpoint.clone(),
                std::time::Duration::from_secs(config.audit.timeout_secs),
            )?) as Arc<dyn AuditClient>),
            None => None,
        };

        let sessions = Arc::new(SessionManager::new(
            repository.clone() as Arc<dyn SessionRepository>
        ));
        let worker = Arc::new(PendingCommitWorker::new(
            audit,
            sessions.clone(),
            config.worker_config(),
        ));

        info!(
            store = store.name(),
            ledger = ?config.ledger.kind,
            audit = config.audit.endpoint.is_some(),
            "Vault service configured"
        );

        Ok(Self::new(
            sessions,
            repository,
            store,
            ledger,
            PasswordCipher::new(config.kdf.clone()),
            worker,
        )
        .with_commit_target(config.audit.commit_target())
        .with_pipeline_config(config.pipeline_config()))
    }

    pub fn with_registry(mut self, registry: EntryRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_commit_target(mut self, target: CommitTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline = self.pipeline.with_config(config);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.pipeline = self.pipeline.with_progress(progress);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn worker(&self) -> &Arc<PendingCommitWorker> {
        &self.worker
    }

    pub fn registry(&self) -> &EntryRegistry {
        &self.registry
    }

    /// Open the user's vault and bind their runtime context.
    ///
    /// The latest vault record is loaded (created on first open) and
    /// `password` must open its committed blob, if any. A session that
    /// already holds content keeps it and only gets the new runtime context;
    /// otherwise the decrypted blob is attached.
    ///
    /// # Errors
    /// - `Crypto("could not open vault")` for a wrong password or damaged blob;
    ///   the session is left as it was
    /// - `Storage` if the blob cannot be fetched
    pub async fn open_vault(
        &self,
        user_id: &UserId,
        password: &[u8],
        runtime: RuntimeContext,
    ) -> Result<VaultRecord> {
        let handle = self.sessions.prepare(user_id).await?;
        let attached = handle.lock().await.is_attached();

        let record = match self.vaults.get_latest_by_user_id(user_id).await? {
            Some(record) => record,
            None => {
                let record = VaultRecord::new(user_id.clone());
                self.vaults.save_vault(&record).await?;
                info!(user_id = %user_id, vault_id = %record.id, "Vault record created");
                record
            }
        };

        if attached {
            // Restored sessions still have to prove the password.
            if let Some(content_id) = &record.content_id {
                self.decrypt_content(content_id, password).await?;
            }
            self.sessions.set_runtime_context(user_id, runtime).await?;
            debug!(user_id = %user_id, "Vault already open, runtime refreshed");
            return Ok(record);
        }

        let payload = match &record.content_id {
            Some(content_id) => self.decrypt_content(content_id, password).await?,
            None => VaultPayload::new(),
        };

        self.sessions
            .attach_vault(user_id, payload, runtime, record.content_id.clone())
            .await?;
        info!(user_id = %user_id, vault_id = %record.id, "Vault opened");
        Ok(record)
    }

    async fn decrypt_content(&self, content_id: &ContentId, password: &[u8]) -> Result<VaultPayload> {
        let blob = self.store.get(content_id).await?;
        let cipher = self.cipher.clone();
        let password = SensitiveBytes::new(password.to_vec());
        let plaintext = tokio::task::spawn_blocking(move || {
            cipher
                .decrypt(&blob, password.as_bytes())
                .map(SensitiveBytes::new)
        })
        .await
        .map_err(|e| Error::Crypto(format!("Decryption task failed: {}", e)))??;
        VaultPayload::from_bytes(plaintext.as_bytes())
    }

    /// Add an entry and return its generated id.
    pub async fn add_entry(&self, user_id: &UserId, entry: Entry) -> Result<String> {
        let kind = entry.kind();
        let handler = self.registry.handler_for(kind)?;
        let entry_id = self
            .sessions
            .update_vault(user_id, |vault| handler.add(user_id, vault, entry))
            .await?;
        self.notify(user_id, MutationAction::Add, kind, &entry_id)
            .await;
        Ok(entry_id)
    }

    /// Decode `raw` JSON as an entry of kind `tag`, then add it.
    ///
    /// # Errors
    /// - `UnknownEntryKind` if `tag` is not a registered kind
    /// - `Serialization` if `raw` is malformed
    pub async fn add_entry_raw(&self, user_id: &UserId, tag: &str, raw: &[u8]) -> Result<String> {
        let entry = self.registry.unmarshal_entry(tag, raw)?;
        self.add_entry(user_id, entry).await
    }

    /// Replace an existing entry, matched by id.
    pub async fn edit_entry(&self, user_id: &UserId, entry: Entry) -> Result<()> {
        let kind = entry.kind();
        let entry_id = entry.id().to_string();
        let handler = self.registry.handler_for(kind)?;
        self.sessions
            .update_vault(user_id, |vault| handler.edit(user_id, vault, entry))
            .await?;
        self.notify(user_id, MutationAction::Edit, kind, &entry_id)
            .await;
        Ok(())
    }

    /// Decode `raw` as an entry of kind `tag` and apply it as an edit.
    pub async fn edit_entry_raw(&self, user_id: &UserId, tag: &str, raw: &[u8]) -> Result<()> {
        let entry = self.registry.unmarshal_entry(tag, raw)?;
        self.edit_entry(user_id, entry).await
    }

    pub async fn trash_entry(&self, user_id: &UserId, kind: EntryKind, entry_id: &str) -> Result<()> {
        let handler = self.registry.handler_for(kind)?;
        self.sessions
            .update_vault(user_id, |vault| handler.trash(user_id, vault, entry_id))
            .await?;
        self.notify(user_id, MutationAction::Trash, kind, entry_id)
            .await;
        Ok(())
    }

    pub async fn restore_entry(
        &self,
        user_id: &UserId,
        kind: EntryKind,
        entry_id: &str,
    ) -> Result<()> {
        let handler = self.registry.handler_for(kind)?;
        self.sessions
            .update_vault(user_id, |vault| handler.restore(user_id, vault, entry_id))
            .await?;
        self.notify(user_id, MutationAction::Restore, kind, entry_id)
            .await;
        Ok(())
    }

    /// Create a folder and return its id.
    pub async fn add_folder(&self, user_id: &UserId, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("Folder name cannot be empty".to_string()));
        }
        let folder_id = self
            .sessions
            .update_vault(user_id, |vault| Ok(vault.add_folder(name)))
            .await?;
        debug!(user_id = %user_id, folder_id = %folder_id, "Folder added");
        Ok(folder_id)
    }

    pub async fn list_folders(&self, user_id: &UserId) -> Result<Vec<Folder>> {
        let handle = self.sessions.get_session(user_id).await?;
        let folders = handle.lock().await.vault().folders.clone();
        Ok(folders)
    }

    /// Entries of `kind`, optionally including trashed ones.
    pub async fn list_entries(
        &self,
        user_id: &UserId,
        kind: EntryKind,
        include_trashed: bool,
    ) -> Result<Vec<Entry>> {
        let handle = self.sessions.get_session(user_id).await?;
        let entries = handle.lock().await.vault().entries.of_kind(kind);
        Ok(entries
            .into_iter()
            .filter(|e| include_trashed || !e.base().trashed)
            .collect())
    }

    pub async fn get_entry(&self, user_id: &UserId, kind: EntryKind, entry_id: &str) -> Result<Entry> {
        self.list_entries(user_id, kind, true)
            .await?
            .into_iter()
            .find(|e| e.id() == entry_id)
            .ok_or_else(|| Error::NotFound(format!("No {} entry with id {}", kind, entry_id)))
    }

    /// Commit the current vault content.
    pub async fn sync(
        &self,
        user_id: &UserId,
        password: &[u8],
    ) -> std::result::Result<SyncOutcome, SyncError> {
        self.pipeline.sync(user_id, password).await
    }

    pub async fn status(&self, user_id: &UserId) -> Result<SessionStatus> {
        let handle = self.sessions.get_session(user_id).await?;
        let session = handle.lock().await;
        Ok(SessionStatus {
            state: session.state(),
            dirty: session.is_dirty(),
            last_content_id: session.last_content_id().cloned(),
            last_synced_at: session.last_synced_at(),
            entries: session.vault().entries.len(),
            pending_commits: session.pending_commits().len(),
        })
    }

    pub async fn end_session(&self, user_id: &UserId) -> Result<()> {
        self.sessions.end_session(user_id).await
    }

    pub async fn logout(&self, user_id: &UserId) -> Result<()> {
        self.sessions.logout_user(user_id).await
    }

    /// Seal the vault password to the session's identity for later recovery.
    pub async fn wrap_password(&self, user_id: &UserId, password: &[u8]) -> Result<WrappedSecret> {
        let identity = self.identity(user_id).await?;
        wrap_vault_password(password, &identity)
    }

    /// Recover a password sealed with [`VaultService::wrap_password`].
    pub async fn recover_password(
        &self,
        user_id: &UserId,
        wrapped: &WrappedSecret,
    ) -> Result<SensitiveBytes> {
        let identity = self.identity(user_id).await?;
        recover_vault_password(wrapped, &identity)
    }

    async fn identity(&self, user_id: &UserId) -> Result<IdentitySecret> {
        let handle = self.sessions.get_session(user_id).await?;
        let session = handle.lock().await;
        session
            .runtime()
            .map(|ctx| ctx.identity().clone())
            .ok_or_else(|| Error::NotPermitted(format!("No identity for user {}", user_id)))
    }

    /// Sign an envelope for a completed mutation and hand it to the worker.
    async fn notify(&self, user_id: &UserId, action: MutationAction, kind: EntryKind, entry_id: &str) {
        let runtime = match self.sessions.get_session(user_id).await {
            Ok(handle) => handle.lock().await.runtime().cloned(),
            Err(_) => None,
        };
        let Some(runtime) = runtime else {
            debug!(user_id = %user_id, "No runtime context, commit envelope skipped");
            return;
        };

        let mutation = EntryMutation {
            action,
            kind,
            entry_id: entry_id.to_string(),
        };
        match CommitEnvelope::sign(
            runtime.identity(),
            &self.target,
            user_id.as_str(),
            runtime.actor_role(),
            &mutation,
            Utc::now().timestamp_millis(),
        ) {
            Ok(envelope) => self.worker.dispatch(user_id, envelope).await,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Failed to sign commit envelope");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ledgervault_crypto::KdfParams;
    use ledgervault_storage::MemoryContentStore;
    use ledgervault_sync::{SyncStage, WorkerConfig};
    use ledgervault_vault::{
        EntryBase, LoginEntry, MemorySessionRepository, MemoryVaultRepository, NoteEntry,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct RecordingAudit {
        down: AtomicBool,
        received: StdMutex<Vec<CommitEnvelope>>,
    }

    #[async_trait]
    impl AuditClient for RecordingAudit {
        async fn submit(&self, envelope: &CommitEnvelope) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::ExternalCommit("unreachable".to_string()));
            }
            self.received.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    struct Fixture {
        service: VaultService,
        audit: Arc<RecordingAudit>,
        store: MemoryContentStore,
        vaults: Arc<MemoryVaultRepository>,
        snapshots: Arc<MemorySessionRepository>,
    }

    impl Fixture {
        /// Another process over the same store and vault metadata.
        fn restart(&self) -> VaultService {
            build(
                self.store.clone(),
                self.vaults.clone(),
                Arc::new(MemorySessionRepository::new()),
                self.audit.clone(),
            )
        }

        /// Another process that also sees the stored session snapshots.
        fn resume(&self) -> VaultService {
            build(
                self.store.clone(),
                self.vaults.clone(),
                self.snapshots.clone(),
                self.audit.clone(),
            )
        }
    }

    fn build(
        store: MemoryContentStore,
        vaults: Arc<MemoryVaultRepository>,
        snapshots: Arc<MemorySessionRepository>,
        audit: Arc<RecordingAudit>,
    ) -> VaultService {
        let sessions = Arc::new(SessionManager::new(snapshots));
        let worker = Arc::new(PendingCommitWorker::new(
            Some(audit),
            sessions.clone(),
            WorkerConfig::default(),
        ));
        VaultService::new(
            sessions,
            vaults,
            Arc::new(store),
            Arc::new(MemoryLedger::new()),
            PasswordCipher::new(KdfParams::insecure_testing()),
            worker,
        )
    }

    fn fixture() -> Fixture {
        let audit = Arc::new(RecordingAudit::default());
        let store = MemoryContentStore::new();
        let vaults = Arc::new(MemoryVaultRepository::new());
        let snapshots = Arc::new(MemorySessionRepository::new());
        Fixture {
            service: build(store.clone(), vaults.clone(), snapshots.clone(), audit.clone()),
            audit,
            store,
            vaults,
            snapshots,
        }
    }

    fn user() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn runtime() -> RuntimeContext {
        RuntimeContext::new(IdentitySecret::generate(), "owner")
    }

    fn login(name: &str) -> Entry {
        Entry::Login(LoginEntry {
            base: EntryBase::named(name),
            username: "alice@example.com".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_first_open_creates_empty_vault() {
        let f = fixture();
        let record = f.service.open_vault(&user(), b"pw", runtime()).await.unwrap();

        assert!(record.content_id.is_none());
        let status = f.service.status(&user()).await.unwrap();
        assert_eq!(status.entries, 0);
        assert!(!status.dirty);
    }

    #[tokio::test]
    async fn test_crud_marks_dirty_and_lists() {
        let f = fixture();
        f.service.open_vault(&user(), b"pw", runtime()).await.unwrap();

        let id = f.service.add_entry(&user(), login("GitHub")).await.unwrap();
        assert!(f.service.status(&user()).await.unwrap().dirty);

        f.service.trash_entry(&user(), EntryKind::Login, &id).await.unwrap();
        assert!(f
            .service
            .list_entries(&user(), EntryKind::Login, false)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            f.service
                .list_entries(&user(), EntryKind::Login, true)
                .await
                .unwrap()
                .len(),
            1
        );

        f.service.restore_entry(&user(), EntryKind::Login, &id).await.unwrap();
        let entry = f.service.get_entry(&user(), EntryKind::Login, &id).await.unwrap();
        assert!(!entry.base().trashed);
    }

    #[tokio::test]
    async fn test_crud_requires_open_vault() {
        let f = fixture();
        f.service.sessions().prepare(&user()).await.unwrap();

        let result = f.service.add_entry(&user(), login("GitHub")).await;
        assert!(matches!(result, Err(Error::NotPermitted(_))));
    }

    #[tokio::test]
    async fn test_edit_missing_entry_is_not_found_and_stays_clean() {
        let f = fixture();
        f.service.open_vault(&user(), b"pw", runtime()).await.unwrap();

        let mut entry = login("GitHub");
        entry.base_mut().id = "missing".to_string();
        let result = f.service.edit_entry(&user(), entry).await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!f.service.status(&user()).await.unwrap().dirty);
    }

    #[tokio::test]
    async fn test_raw_entry_validation() {
        let f = fixture();
        f.service.open_vault(&user(), b"pw", runtime()).await.unwrap();

        let unknown = f.service.add_entry_raw(&user(), "wifi", b"{}").await;
        assert!(matches!(unknown, Err(Error::UnknownEntryKind(_))));
        assert!(unknown.unwrap_err().is_validation());

        let malformed = f.service.add_entry_raw(&user(), "note", b"not json").await;
        assert!(matches!(malformed, Err(Error::Serialization(_))));

        let id = f
            .service
            .add_entry_raw(&user(), "note", br#"{"entryName": "Wifi", "content": "hunter2"}"#)
            .await
            .unwrap();
        match f.service.get_entry(&user(), EntryKind::Note, &id).await.unwrap() {
            Entry::Note(NoteEntry { content, .. }) => assert_eq!(content, "hunter2"),
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_folders() {
        let f = fixture();
        f.service.open_vault(&user(), b"pw", runtime()).await.unwrap();

        assert!(f.service.add_folder(&user(), "  ").await.is_err());
        let folder = f.service.add_folder(&user(), "Work").await.unwrap();

        let mut entry = login("Jira");
        entry.base_mut().folder_id = Some(folder.clone());
        f.service.add_entry(&user(), entry).await.unwrap();

        let mut stray = login("Stray");
        stray.base_mut().folder_id = Some("nope".to_string());
        let result = f.service.add_entry(&user(), stray).await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let folders = f.service.list_folders(&user()).await.unwrap();
        assert!(folders.iter().any(|f| f.id == folder && f.name == "Work"));
    }

    #[tokio::test]
    async fn test_sync_then_reopen_with_password() {
        let f = fixture();
        f.service.open_vault(&user(), b"pw", runtime()).await.unwrap();
        let id = f.service.add_entry(&user(), login("GitHub")).await.unwrap();

        let outcome = f.service.sync(&user(), b"pw").await.unwrap();
        assert!(outcome.clean);
        assert_eq!(f.store.len(), 1);
        f.service.logout(&user()).await.unwrap();

        let service = f.restart();
        let wrong = service.open_vault(&user(), b"wrong", runtime()).await;
        match wrong {
            Err(Error::Crypto(msg)) => assert_eq!(msg, ledgervault_crypto::OPEN_FAILURE),
            other => panic!("unexpected result: {:?}", other),
        }
        let handle = service.sessions().get_session(&user()).await.unwrap();
        assert!(!handle.lock().await.is_attached());

        service.open_vault(&user(), b"pw", runtime()).await.unwrap();
        let entry = service.get_entry(&user(), EntryKind::Login, &id).await.unwrap();
        assert_eq!(entry.base().entry_name, "GitHub");
    }

    #[tokio::test]
    async fn test_restored_session_still_checks_password() {
        let f = fixture();
        f.service.open_vault(&user(), b"pw1", runtime()).await.unwrap();
        f.service.add_entry(&user(), login("GitHub")).await.unwrap();
        f.service.sync(&user(), b"pw1").await.unwrap();
        f.service.end_session(&user()).await.unwrap();

        let resumed = f.resume();
        let wrong = resumed.open_vault(&user(), b"WRONG", runtime()).await;
        assert!(matches!(wrong, Err(Error::Crypto(ref m)) if m == ledgervault_crypto::OPEN_FAILURE));
        let handle = resumed.sessions().get_session(&user()).await.unwrap();
        assert!(handle.lock().await.runtime().is_none());

        resumed.open_vault(&user(), b"pw1", runtime()).await.unwrap();
        resumed.add_entry(&user(), login("GitLab")).await.unwrap();
        let err = resumed.sync(&user(), b"WRONG").await.unwrap_err();
        assert_eq!(err.stage, SyncStage::Encrypting);
        assert!(matches!(err.error, Error::Crypto(_)));
        assert!(resumed.status(&user()).await.unwrap().dirty);
        resumed.sync(&user(), b"pw1").await.unwrap();

        // A device without the snapshot still opens with the real password.
        let fresh = f.restart();
        fresh.open_vault(&user(), b"pw1", runtime()).await.unwrap();
        assert_eq!(fresh.status(&user()).await.unwrap().entries, 2);
    }

    #[tokio::test]
    async fn test_rehydrated_session_rejects_wrong_password() {
        let f = fixture();
        f.service.open_vault(&user(), b"pw1", runtime()).await.unwrap();
        f.service.add_entry(&user(), login("GitHub")).await.unwrap();
        f.service.sync(&user(), b"pw1").await.unwrap();
        f.service.end_session(&user()).await.unwrap();

        let resumed = f.resume();
        crate::rehydrate::rehydrate(resumed.sessions(), resumed.worker(), &CancellationToken::new())
            .await
            .unwrap();

        for _ in 0..2 {
            let wrong = resumed.open_vault(&user(), b"WRONG", runtime()).await;
            assert!(matches!(wrong, Err(Error::Crypto(_))));
        }
        resumed.open_vault(&user(), b"pw1", runtime()).await.unwrap();
        assert_eq!(resumed.status(&user()).await.unwrap().entries, 1);

        let wrong = resumed.open_vault(&user(), b"WRONG", runtime()).await;
        assert!(matches!(wrong, Err(Error::Crypto(_))));
        let err = resumed.sync(&user(), b"WRONG").await.unwrap_err();
        assert!(matches!(err.error, Error::Crypto(_)));
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_without_open_vault_fails_at_marshaling() {
        let f = fixture();
        f.service.sessions().prepare(&user()).await.unwrap();

        let err = f.service.sync(&user(), b"pw").await.unwrap_err();
        assert_eq!(err.stage, SyncStage::Marshaling);
    }

    #[tokio::test]
    async fn test_reopen_keeps_unsynced_edits() {
        let f = fixture();
        f.service.open_vault(&user(), b"pw", runtime()).await.unwrap();
        f.service.add_entry(&user(), login("GitHub")).await.unwrap();

        f.service.open_vault(&user(), b"other", runtime()).await.unwrap();

        let status = f.service.status(&user()).await.unwrap();
        assert_eq!(status.entries, 1);
        assert!(status.dirty);
    }

    #[tokio::test]
    async fn test_mutations_reach_audit_service() {
        let f = fixture();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(f.service.worker().clone().run(shutdown.clone()));

        let identity = IdentitySecret::generate();
        let public_key = identity.public_key();
        f.service
            .open_vault(&user(), b"pw", RuntimeContext::new(identity, "owner"))
            .await
            .unwrap();
        let id = f.service.add_entry(&user(), login("GitHub")).await.unwrap();
        f.service.trash_entry(&user(), EntryKind::Login, &id).await.unwrap();

        for _ in 0..200 {
            if f.audit.received.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        worker.await.unwrap();

        let received = f.audit.received.lock().unwrap().clone();
        assert_eq!(received.len(), 2);
        for envelope in &received {
            envelope.verify(&public_key).unwrap();
        }
        assert!(received[0].commit.metadata.content.contains("add"));
        assert!(received[1].commit.metadata.content.contains("trash"));
    }

    #[tokio::test]
    async fn test_audit_outage_never_fails_crud() {
        let f = fixture();
        f.audit.down.store(true, Ordering::SeqCst);
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(f.service.worker().clone().run(shutdown.clone()));
        f.service.open_vault(&user(), b"pw", runtime()).await.unwrap();

        for n in 0..3 {
            f.service
                .add_entry(&user(), login(&format!("site {}", n)))
                .await
                .unwrap();
        }
        for _ in 0..200 {
            if f.service.worker().queue_len(&user()).await == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        worker.await.unwrap();

        let status = f.service.status(&user()).await.unwrap();
        assert_eq!(status.entries, 3);
        assert_eq!(status.pending_commits, 3);
        assert_eq!(f.service.worker().queue_len(&user()).await, 3);
    }

    #[tokio::test]
    async fn test_password_recovery_wrap() {
        let f = fixture();
        f.service.open_vault(&user(), b"pw", runtime()).await.unwrap();

        let wrapped = f.service.wrap_password(&user(), b"correct horse").await.unwrap();
        let recovered = f.service.recover_password(&user(), &wrapped).await.unwrap();
        assert_eq!(recovered.as_bytes(), b"correct horse");
    }

    #[tokio::test]
    async fn test_from_config_data_dir() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::for_data_dir(dir.path());
        config.kdf = KdfParams::insecure_testing();

        let service = VaultService::from_config(&config).unwrap();
        service.open_vault(&user(), b"pw", runtime()).await.unwrap();
        service.add_entry(&user(), login("GitHub")).await.unwrap();
        let outcome = service.sync(&user(), b"pw").await.unwrap();
        service.end_session(&user()).await.unwrap();

        assert!(dir.path().join("ledger.jsonl").exists());
        assert!(dir.path().join("ledgervault.db").exists());

        let reopened = VaultService::from_config(&config).unwrap();
        let record = reopened.open_vault(&user(), b"pw", runtime()).await.unwrap();
        assert_eq!(record.content_id, Some(outcome.content_id));
        assert_eq!(reopened.status(&user()).await.unwrap().entries, 1);
    }
}

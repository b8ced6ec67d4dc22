//! The vault commit pipeline.
//!
//! `Marshaling → Encrypting → Uploading → Anchoring → PersistingMetadata →
//! Committed`. The session is only touched in the last step; a failure at any
//! earlier stage leaves it exactly as it was, still dirty and pointing at the
//! previous content id.
//!
//! Upload is content-addressed, so retrying it (or the whole pipeline) never
//! duplicates stored data. Anchoring is not idempotent and is never retried
//! here; a whole-pipeline retry after an anchor failure may leave one stray
//! ledger transaction.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::progress::{NoopProgress, ProgressSink, SyncStage};
use crate::retry::{RetryConfig, RetryExecutor};
use ledgervault_common::{ContentId, Error, Result, SensitiveBytes, TxRef, UserId};
use ledgervault_crypto::PasswordCipher;
use ledgervault_storage::{ContentStore, LedgerAnchor};
use ledgervault_vault::{SessionManager, VaultRecord, VaultRepository};

/// A pipeline failure and the stage it happened in.
#[derive(Debug, Error)]
#[error("sync failed while {stage}: {error}")]
pub struct SyncError {
    pub stage: SyncStage,
    #[source]
    pub error: Error,
}

impl SyncError {
    fn at(stage: SyncStage) -> impl FnOnce(Error) -> SyncError {
        move |error| SyncError { stage, error }
    }

    /// Whether re-running the pipeline may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.error,
            Error::Storage(_) | Error::Anchor(_) | Error::Timeout(_) | Error::Io(_)
        )
    }
}

/// Tuning for external calls.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on each content store, ledger and metadata call.
    pub call_timeout: Duration,
    /// Retry policy for uploads.
    pub store_retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            store_retry: RetryConfig::new(2).with_initial_delay(Duration::from_millis(250)),
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub content_id: ContentId,
    pub tx_ref: TxRef,
    pub vault: VaultRecord,
    /// False if the session changed mid-sync and is still dirty.
    pub clean: bool,
}

/// Orchestrates encrypt → store → anchor → persist → mark clean.
pub struct SyncPipeline {
    sessions: Arc<SessionManager>,
    cipher: PasswordCipher,
    store: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerAnchor>,
    vaults: Arc<dyn VaultRepository>,
    progress: Arc<dyn ProgressSink>,
    config: PipelineConfig,
}

impl SyncPipeline {
    pub fn new(
        sessions: Arc<SessionManager>,
        cipher: PasswordCipher,
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerAnchor>,
        vaults: Arc<dyn VaultRepository>,
    ) -> Self {
        Self {
            sessions,
            cipher,
            store,
            ledger,
            vaults,
            progress: Arc::new(NoopProgress),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Commit the user's current vault content.
    ///
    /// # Preconditions
    /// - The user has a session with attached content and a runtime context
    ///
    /// # Postconditions
    /// - On success the vault record points at the new blob and anchor, and
    ///   the session is clean unless it was mutated meanwhile
    /// - On failure nothing is persisted and the session is unchanged
    ///
    /// # Errors
    /// - `NotFound`/`NotPermitted` at `Marshaling` for missing session or identity
    /// - `Crypto("could not open vault")` at `Encrypting` if `password` does
    ///   not open the last committed blob
    /// - `Storage` at `Uploading`, `Anchor` at `Anchoring`
    /// - `Timeout` at whichever stage exceeded the call bound
    pub async fn sync(
        &self,
        user_id: &UserId,
        password: &[u8],
    ) -> std::result::Result<SyncOutcome, SyncError> {
        info!(user_id = %user_id, "Sync started");
        let result = self.run(user_id, password).await;
        match &result {
            Ok(outcome) => info!(
                user_id = %user_id,
                content_id = %outcome.content_id,
                tx_ref = %outcome.tx_ref,
                clean = outcome.clean,
                "Sync committed"
            ),
            Err(err) => warn!(
                user_id = %user_id,
                stage = %err.stage,
                error = %err.error,
                "Sync failed"
            ),
        }
        result
    }

    async fn run(
        &self,
        user_id: &UserId,
        password: &[u8],
    ) -> std::result::Result<SyncOutcome, SyncError> {
        self.report(SyncStage::Marshaling);
        let (plaintext, identity, revision) = {
            let handle = self
                .sessions
                .get_session(user_id)
                .await
                .map_err(SyncError::at(SyncStage::Marshaling))?;
            let session = handle.lock().await;
            if !session.is_attached() {
                return Err(SyncError {
                    stage: SyncStage::Marshaling,
                    error: Error::NotPermitted(format!("Vault not open for user {}", user_id)),
                });
            }
            let identity = session
                .runtime()
                .map(|ctx| ctx.identity().clone())
                .ok_or_else(|| SyncError {
                    stage: SyncStage::Marshaling,
                    error: Error::NotPermitted(format!("No identity for user {}", user_id)),
                })?;
            let plaintext = session
                .vault()
                .to_bytes()
                .map(SensitiveBytes::new)
                .map_err(SyncError::at(SyncStage::Marshaling))?;
            (plaintext, identity, session.revision())
        };

        self.report(SyncStage::Encrypting);
        self.verify_password(user_id, password)
            .await
            .map_err(SyncError::at(SyncStage::Encrypting))?;
        let blob = self
            .encrypt(plaintext, SensitiveBytes::new(password.to_vec()))
            .await
            .map_err(SyncError::at(SyncStage::Encrypting))?;

        self.report(SyncStage::Uploading);
        let executor = RetryExecutor::new(self.config.store_retry.clone());
        let content_id = executor
            .execute(|| self.bounded("content store put", self.store.put(blob.clone())))
            .await
            .map_err(SyncError::at(SyncStage::Uploading))?;
        debug!(user_id = %user_id, content_id = %content_id, "Blob uploaded");

        self.report(SyncStage::Anchoring);
        let tx_ref = self
            .bounded("ledger anchor", self.ledger.anchor(&identity, &content_id))
            .await
            .map_err(SyncError::at(SyncStage::Anchoring))?;

        self.report(SyncStage::PersistingMetadata);
        let vault = self
            .persist_metadata(user_id, &content_id, &tx_ref)
            .await
            .map_err(SyncError::at(SyncStage::PersistingMetadata))?;

        let clean = self
            .sessions
            .sync(user_id, content_id.clone(), revision)
            .await
            .map_err(SyncError::at(SyncStage::Committed))?;
        self.report(SyncStage::Committed);

        Ok(SyncOutcome {
            content_id,
            tx_ref,
            vault,
            clean,
        })
    }

    /// The password must open the last committed blob, if there is one, so a
    /// mistyped password can never re-key the vault.
    async fn verify_password(&self, user_id: &UserId, password: &[u8]) -> Result<()> {
        let content_id = match self
            .bounded("vault lookup", self.vaults.get_latest_by_user_id(user_id))
            .await?
            .and_then(|record| record.content_id)
        {
            Some(content_id) => content_id,
            None => return Ok(()),
        };

        let blob = self
            .bounded("content store get", self.store.get(&content_id))
            .await?;
        let cipher = self.cipher.clone();
        let password = SensitiveBytes::new(password.to_vec());
        tokio::task::spawn_blocking(move || {
            cipher.decrypt(&blob, password.as_bytes()).map(SensitiveBytes::new)
        })
        .await
        .map_err(|e| Error::Crypto(format!("Decryption task failed: {}", e)))??;
        Ok(())
    }

    async fn encrypt(&self, plaintext: SensitiveBytes, password: SensitiveBytes) -> Result<Vec<u8>> {
        let cipher = self.cipher.clone();
        // Argon2 blocks; keep it off the async workers.
        tokio::task::spawn_blocking(move || cipher.encrypt(plaintext.as_bytes(), password.as_bytes()))
            .await
            .map_err(|e| Error::Crypto(format!("Encryption task failed: {}", e)))?
    }

    async fn persist_metadata(
        &self,
        user_id: &UserId,
        content_id: &ContentId,
        tx_ref: &TxRef,
    ) -> Result<VaultRecord> {
        let current = self
            .bounded("vault lookup", self.vaults.get_latest_by_user_id(user_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("No vault record for user {}", user_id)))?;

        let updated = current.committed(content_id.clone(), tx_ref.clone());
        self.bounded("vault save", self.vaults.save_vault(&updated))
            .await?;
        Ok(updated)
    }

    async fn bounded<T>(&self, call: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} exceeded {:?}",
                call, self.config.call_timeout
            ))),
        }
    }

    fn report(&self, stage: SyncStage) {
        self.progress.report(stage.into());
    }
}

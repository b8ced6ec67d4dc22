//! Session manager owning every in-memory session.
//!
//! The map lock only guards lookup, insert and delete. Field mutation happens
//! under each session's own lock, so CRUD for one user never waits on another.
//! Locks are always taken map first, then session.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::commit::CommitEnvelope;
use crate::payload::VaultPayload;
use crate::repository::SessionRepository;
use crate::session::{RuntimeContext, Session, SessionSnapshot};
use ledgervault_common::{ContentId, Error, Result, UserId};

/// Shared reference to one user's session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Owner of the userID → session map.
pub struct SessionManager {
    sessions: Mutex<HashMap<UserId, SessionHandle>>,
    repository: Arc<dyn SessionRepository>,
}

impl SessionManager {
    /// Create a manager persisting snapshots to `repository`.
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            repository,
        }
    }

    /// Durable snapshot storage backing this manager.
    pub fn repository(&self) -> &Arc<dyn SessionRepository> {
        &self.repository
    }

    /// Get or create the session for `user_id`.
    ///
    /// # Postconditions
    /// - Concurrent calls for one user return the same session
    /// - A stored snapshot, if any, is rehydrated and normalized
    ///
    /// # Errors
    /// - Session repository failure
    pub async fn prepare(&self, user_id: &UserId) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(user_id) {
            return Ok(handle.clone());
        }

        let session = match self.repository.get_session(user_id).await? {
            Some(snapshot) => {
                debug!(user_id = %user_id, "Rehydrating session from snapshot");
                Session::from_snapshot(snapshot)
            }
            None => Session::new(user_id.clone()),
        };

        let handle = Arc::new(Mutex::new(session));
        sessions.insert(user_id.clone(), handle.clone());
        info!(user_id = %user_id, "Session prepared");
        Ok(handle)
    }

    /// Get an existing session.
    ///
    /// # Errors
    /// - `Error::NotFound` if the user has no session
    pub async fn get_session(&self, user_id: &UserId) -> Result<SessionHandle> {
        self.sessions
            .lock()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No session for user {}", user_id)))
    }

    /// Attach opened vault content once.
    ///
    /// Returns `false` without touching the session if content is already
    /// attached.
    pub async fn attach_vault(
        &self,
        user_id: &UserId,
        payload: VaultPayload,
        runtime: RuntimeContext,
        content_id: Option<ContentId>,
    ) -> Result<bool> {
        let handle = self.get_session(user_id).await?;
        let attached = handle.lock().await.attach(payload, runtime, content_id);
        if attached {
            info!(user_id = %user_id, "Vault attached");
        } else {
            debug!(user_id = %user_id, "Vault already attached, skipping");
        }
        Ok(attached)
    }

    /// Replace the vault payload and mark the session dirty.
    pub async fn set_vault(&self, user_id: &UserId, payload: VaultPayload) -> Result<()> {
        let handle = self.get_session(user_id).await?;
        handle.lock().await.replace_vault(payload);
        Ok(())
    }

    /// Apply `mutate` to a copy of the payload under the session lock.
    ///
    /// On `Ok` the copy replaces the payload and the session is marked dirty;
    /// on `Err` the session is left untouched.
    ///
    /// # Errors
    /// - `Error::NotFound` if the user has no session
    /// - `Error::NotPermitted` if no vault content is attached
    /// - Whatever `mutate` returns
    pub async fn update_vault<T, F>(&self, user_id: &UserId, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut VaultPayload) -> Result<T>,
    {
        let handle = self.get_session(user_id).await?;
        let mut session = handle.lock().await;
        if !session.is_attached() {
            return Err(Error::NotPermitted(format!(
                "Vault not open for user {}",
                user_id
            )));
        }

        let mut draft = session.vault().clone();
        let output = mutate(&mut draft)?;
        session.replace_vault(draft);
        Ok(output)
    }

    pub async fn mark_dirty(&self, user_id: &UserId) -> Result<()> {
        let handle = self.get_session(user_id).await?;
        handle.lock().await.mark_dirty();
        Ok(())
    }

    pub async fn is_marked_dirty(&self, user_id: &UserId) -> Result<bool> {
        let handle = self.get_session(user_id).await?;
        let dirty = handle.lock().await.is_dirty();
        Ok(dirty)
    }

    /// Record a committed blob observed at `revision`.
    ///
    /// Always updates `last_content_id`; clears dirty only if no mutation
    /// happened after `revision`. Returns whether dirty was cleared.
    pub async fn sync(
        &self,
        user_id: &UserId,
        content_id: ContentId,
        revision: u64,
    ) -> Result<bool> {
        let handle = self.get_session(user_id).await?;
        let cleared = handle.lock().await.mark_synced(content_id.clone(), revision);
        if cleared {
            info!(user_id = %user_id, content_id = %content_id, "Session synced");
        } else {
            info!(
                user_id = %user_id,
                content_id = %content_id,
                "Session changed during sync, staying dirty"
            );
        }
        Ok(cleared)
    }

    /// Replace the runtime context of a live session.
    pub async fn set_runtime_context(
        &self,
        user_id: &UserId,
        runtime: RuntimeContext,
    ) -> Result<()> {
        let handle = self.get_session(user_id).await?;
        handle.lock().await.set_runtime(Some(runtime));
        Ok(())
    }

    /// Persist the session snapshot, then drop it from memory.
    ///
    /// No-op for users without a session. If persisting fails the session
    /// stays in memory.
    pub async fn end_session(&self, user_id: &UserId) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(handle) = sessions.get(user_id).cloned() else {
            return Ok(());
        };

        let snapshot = handle.lock().await.snapshot();
        self.repository.save_session(user_id, &snapshot).await?;
        sessions.remove(user_id);

        info!(user_id = %user_id, "Session ended");
        Ok(())
    }

    /// End the session and discard the runtime context.
    pub async fn logout_user(&self, user_id: &UserId) -> Result<()> {
        if let Ok(handle) = self.get_session(user_id).await {
            handle.lock().await.set_runtime(None);
        }
        self.end_session(user_id).await?;
        info!(user_id = %user_id, "User logged out");
        Ok(())
    }

    /// Append an undelivered envelope to the user's pending queue.
    ///
    /// Goes to the live session if there is one, otherwise to the stored
    /// snapshot so it survives until the next rehydration.
    pub async fn record_pending_commit(
        &self,
        user_id: &UserId,
        envelope: CommitEnvelope,
    ) -> Result<()> {
        let sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(user_id) {
            handle.lock().await.push_pending(envelope);
            return Ok(());
        }

        if let Some(mut snapshot) = self.repository.get_session(user_id).await? {
            snapshot.pending_commits.push(envelope);
            self.repository.save_session(user_id, &snapshot).await?;
        }
        Ok(())
    }

    /// Remove delivered envelopes, identified by [`CommitEnvelope::identity`].
    pub async fn acknowledge_commits(&self, user_id: &UserId, identities: &[String]) -> Result<()> {
        if identities.is_empty() {
            return Ok(());
        }

        let sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(user_id) {
            let removed = handle.lock().await.remove_pending(identities);
            debug!(user_id = %user_id, removed, "Pending commits acknowledged");
            return Ok(());
        }

        if let Some(mut snapshot) = self.repository.get_session(user_id).await? {
            let before = snapshot.pending_commits.len();
            snapshot
                .pending_commits
                .retain(|env| !identities.contains(&env.identity()));
            if snapshot.pending_commits.len() != before {
                self.repository.save_session(user_id, &snapshot).await?;
            }
        }
        Ok(())
    }

    /// Load a stored snapshot into memory unless the user already has a live
    /// session. Returns the pending envelopes it carried.
    pub async fn restore_snapshot(&self, snapshot: SessionSnapshot) -> Vec<CommitEnvelope> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&snapshot.user_id) {
            return Vec::new();
        }

        let user_id = snapshot.user_id.clone();
        let pending = snapshot.pending_commits.clone();
        sessions.insert(
            user_id.clone(),
            Arc::new(Mutex::new(Session::from_snapshot(snapshot))),
        );
        debug!(user_id = %user_id, pending = pending.len(), "Session restored");
        pending
    }

    /// Users with a live session, sorted.
    pub async fn active_users(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.sessions.lock().await.keys().cloned().collect();
        users.sort();
        users
    }
}

//! Per-user vault sessions.
//!
//! A session caches one user's decrypted vault payload together with its
//! sync state. The identity secret used for signing lives in the runtime
//! context, which is never persisted and is zeroized when dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commit::CommitEnvelope;
use crate::payload::VaultPayload;
use ledgervault_common::{ContentId, UserId};
use ledgervault_crypto::IdentitySecret;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no vault content attached yet.
    Prepared,
    /// Content attached, never synced from this session.
    Attached,
    /// Holds mutations not reflected in `last_content_id`.
    Dirty,
    /// Matches the blob at `last_content_id`.
    Synced,
}

/// Secrets and attribution for the logged-in user. Never persisted.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    identity: IdentitySecret,
    actor_role: String,
}

impl RuntimeContext {
    pub fn new(identity: IdentitySecret, actor_role: impl Into<String>) -> Self {
        Self {
            identity,
            actor_role: actor_role.into(),
        }
    }

    /// Identity secret used for ledger anchoring and envelope signing.
    pub fn identity(&self) -> &IdentitySecret {
        &self.identity
    }

    pub fn actor_role(&self) -> &str {
        &self.actor_role
    }
}

/// Durable form of a session.
///
/// Carries the decrypted payload so unsynced edits survive a session end;
/// the runtime context is excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(default)]
    pub vault: VaultPayload,
    #[serde(default)]
    pub attached: bool,
    #[serde(default)]
    pub dirty: bool,
    #[serde(rename = "lastContentID", default)]
    pub last_content_id: Option<ContentId>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pending_commits: Vec<CommitEnvelope>,
}

/// In-memory session for one user.
///
/// Mutated only through [`crate::SessionManager`]; `vault` is always present,
/// starting as an empty normalized payload.
#[derive(Debug)]
pub struct Session {
    user_id: UserId,
    vault: VaultPayload,
    attached: bool,
    dirty: bool,
    revision: u64,
    last_content_id: Option<ContentId>,
    last_synced_at: Option<DateTime<Utc>>,
    last_updated_at: DateTime<Utc>,
    runtime: Option<RuntimeContext>,
    pending_commits: Vec<CommitEnvelope>,
}

impl Session {
    /// Fresh session with an empty payload.
    pub(crate) fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            vault: VaultPayload::new(),
            attached: false,
            dirty: false,
            revision: 0,
            last_content_id: None,
            last_synced_at: None,
            last_updated_at: Utc::now(),
            runtime: None,
            pending_commits: Vec::new(),
        }
    }

    /// Rehydrate from a durable snapshot, normalizing the payload.
    pub(crate) fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let mut vault = snapshot.vault;
        vault.normalize();
        Self {
            user_id: snapshot.user_id,
            vault,
            attached: snapshot.attached,
            dirty: snapshot.dirty,
            revision: 0,
            last_content_id: snapshot.last_content_id,
            last_synced_at: snapshot.last_synced_at,
            last_updated_at: snapshot.last_updated_at,
            runtime: None,
            pending_commits: snapshot.pending_commits,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.user_id.clone(),
            vault: self.vault.clone(),
            attached: self.attached,
            dirty: self.dirty,
            last_content_id: self.last_content_id.clone(),
            last_synced_at: self.last_synced_at,
            last_updated_at: self.last_updated_at,
            pending_commits: self.pending_commits.clone(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn vault(&self) -> &VaultPayload {
        &self.vault
    }

    /// Whether vault content has been attached (opened or set).
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn last_content_id(&self) -> Option<&ContentId> {
        self.last_content_id.as_ref()
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    pub fn runtime(&self) -> Option<&RuntimeContext> {
        self.runtime.as_ref()
    }

    /// Envelopes awaiting delivery, oldest first.
    pub fn pending_commits(&self) -> &[CommitEnvelope] {
        &self.pending_commits
    }

    pub fn state(&self) -> SessionState {
        if self.dirty {
            SessionState::Dirty
        } else if !self.attached {
            SessionState::Prepared
        } else if self.last_synced_at.is_some() {
            SessionState::Synced
        } else {
            SessionState::Attached
        }
    }

    /// Attach opened content. Returns `false` if content was already attached.
    pub(crate) fn attach(
        &mut self,
        mut payload: VaultPayload,
        runtime: RuntimeContext,
        content_id: Option<ContentId>,
    ) -> bool {
        if self.attached {
            return false;
        }
        payload.normalize();
        self.vault = payload;
        self.attached = true;
        self.dirty = false;
        self.last_content_id = content_id;
        self.runtime = Some(runtime);
        self.last_updated_at = Utc::now();
        true
    }

    /// Replace the payload and mark dirty.
    pub(crate) fn replace_vault(&mut self, payload: VaultPayload) {
        self.vault = payload;
        self.attached = true;
        self.mark_dirty();
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
        self.revision += 1;
        self.last_updated_at = Utc::now();
    }

    /// Record a committed blob. Clears dirty only if nothing changed since
    /// `revision` was observed; returns whether it did.
    pub(crate) fn mark_synced(&mut self, content_id: ContentId, revision: u64) -> bool {
        self.last_content_id = Some(content_id);
        self.last_synced_at = Some(Utc::now());
        if self.revision == revision {
            self.dirty = false;
            true
        } else {
            false
        }
    }

    pub(crate) fn set_runtime(&mut self, runtime: Option<RuntimeContext>) {
        self.runtime = runtime;
    }

    pub(crate) fn push_pending(&mut self, envelope: CommitEnvelope) {
        self.pending_commits.push(envelope);
    }

    /// Drop delivered envelopes by identity. Returns how many were removed.
    pub(crate) fn remove_pending(&mut self, identities: &[String]) -> usize {
        let before = self.pending_commits.len();
        self.pending_commits
            .retain(|env| !identities.contains(&env.identity()));
        before - self.pending_commits.len()
    }
}

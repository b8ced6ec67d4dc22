//! Signed audit commit envelopes.
//!
//! An envelope describes one entry mutation without carrying any secret
//! field values. It is signed twice with the user's identity secret:
//! `actor.signature` covers the mutation content, and the outer `signature`
//! covers the serialized commit plus the timestamp.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::entry::EntryKind;
use ledgervault_common::{Error, Result};
use ledgervault_crypto::{IdentitySecret, PublicKey};

/// Where envelopes are filed on the audit service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTarget {
    pub repo_id: String,
    pub branch: String,
    pub app_id: String,
    pub validation_rules: Vec<String>,
}

impl Default for CommitTarget {
    fn default() -> Self {
        Self {
            repo_id: "ledgervault".to_string(),
            branch: "main".to_string(),
            app_id: "ledgervault".to_string(),
            validation_rules: Vec::new(),
        }
    }
}

/// Kind of entry mutation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Add,
    Edit,
    Trash,
    Restore,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Add => "add",
            MutationAction::Edit => "edit",
            MutationAction::Trash => "trash",
            MutationAction::Restore => "restore",
        }
    }

    fn status_change(&self) -> Option<StatusChange> {
        let (old, new) = match self {
            MutationAction::Add => ("absent", "active"),
            MutationAction::Trash => ("active", "trashed"),
            MutationAction::Restore => ("trashed", "active"),
            MutationAction::Edit => return None,
        };
        Some(StatusChange {
            old: old.to_string(),
            new: new.to_string(),
        })
    }
}

/// One audited entry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMutation {
    pub action: MutationAction,
    pub kind: EntryKind,
    pub entry_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitMetadata {
    pub message: String,
    pub content: String,
    pub context: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_change: Option<StatusChange>,
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    #[serde(rename = "repoID")]
    pub repo_id: String,
    pub branch: String,
    pub metadata: CommitMetadata,
    pub validation_rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    #[serde(rename = "appID")]
    pub app_id: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// Audit record sent to the external trace service.
///
/// Immutable once built; [`CommitEnvelope::identity`] is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEnvelope {
    pub commit: Commit,
    pub signature: String,
    pub meta: CommitMeta,
}

impl CommitEnvelope {
    /// Build and sign an envelope for `mutation`.
    ///
    /// # Errors
    /// - `Error::Serialization` if the commit cannot be encoded
    pub fn sign(
        identity: &IdentitySecret,
        target: &CommitTarget,
        actor_id: &str,
        actor_role: &str,
        mutation: &EntryMutation,
        timestamp: i64,
    ) -> Result<Self> {
        let content = serde_json::json!({
            "action": mutation.action.as_str(),
            "kind": mutation.kind.as_str(),
            "entryID": mutation.entry_id,
        })
        .to_string();
        let actor_signature = URL_SAFE_NO_PAD.encode(identity.sign(content.as_bytes()));

        let commit = Commit {
            repo_id: target.repo_id.clone(),
            branch: target.branch.clone(),
            metadata: CommitMetadata {
                message: format!("{} {} entry", mutation.action.as_str(), mutation.kind),
                content,
                context: serde_json::json!({
                    "signer": identity.public_key().to_base64(),
                }),
                status_change: mutation.action.status_change(),
                actor: Actor {
                    id: actor_id.to_string(),
                    role: actor_role.to_string(),
                    signature: actor_signature,
                },
            },
            validation_rules: target.validation_rules.clone(),
        };

        let signature = URL_SAFE_NO_PAD.encode(identity.sign(&signing_bytes(&commit, timestamp)?));
        Ok(Self {
            commit,
            signature,
            meta: CommitMeta {
                app_id: target.app_id.clone(),
                timestamp,
            },
        })
    }

    /// Dedup key: outer signature plus timestamp.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.signature, self.meta.timestamp)
    }

    /// Check both signatures against `public_key`.
    ///
    /// # Errors
    /// - `Error::Crypto` if either signature does not verify
    pub fn verify(&self, public_key: &PublicKey) -> Result<()> {
        let actor = &self.commit.metadata.actor;
        public_key.verify(
            self.commit.metadata.content.as_bytes(),
            &decode_signature(&actor.signature)?,
        )?;
        public_key.verify(
            &signing_bytes(&self.commit, self.meta.timestamp)?,
            &decode_signature(&self.signature)?,
        )
    }
}

fn signing_bytes(commit: &Commit, timestamp: i64) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(commit)?;
    bytes.extend_from_slice(timestamp.to_string().as_bytes());
    Ok(bytes)
}

fn decode_signature(encoded: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| Error::Crypto("Malformed envelope signature".to_string()))
}

//! Decrypted vault content.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entry::{
    CardEntry, Entry, EntryBase, EntryKind, EntryRecord, IdentityEntry, LoginEntry, NoteEntry,
    SshKeyEntry,
};
use ledgervault_common::Result;

/// Current payload format version.
pub const PAYLOAD_VERSION: u32 = 1;

/// Name given to a vault that has none.
pub const DEFAULT_VAULT_NAME: &str = "Personal";

/// Folder grouping entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Folder {
    pub id: String,
    pub name: String,
}

/// Entries grouped by kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntriesByType {
    pub login: Vec<LoginEntry>,
    pub card: Vec<CardEntry>,
    pub identity: Vec<IdentityEntry>,
    pub note: Vec<NoteEntry>,
    pub ssh_key: Vec<SshKeyEntry>,
}

impl EntriesByType {
    /// Number of entries of `kind`, trashed included.
    pub fn count(&self, kind: EntryKind) -> usize {
        match kind {
            EntryKind::Login => self.login.len(),
            EntryKind::Card => self.card.len(),
            EntryKind::Identity => self.identity.len(),
            EntryKind::Note => self.note.len(),
            EntryKind::SshKey => self.ssh_key.len(),
        }
    }

    /// Total number of entries across all kinds.
    pub fn len(&self) -> usize {
        EntryKind::ALL.iter().map(|kind| self.count(*kind)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries of `kind` as [`Entry`] values, in stored order.
    pub fn of_kind(&self, kind: EntryKind) -> Vec<Entry> {
        fn collect<T: EntryRecord>(list: &[T]) -> Vec<Entry> {
            list.iter().cloned().map(T::into_entry).collect()
        }
        match kind {
            EntryKind::Login => collect(&self.login),
            EntryKind::Card => collect(&self.card),
            EntryKind::Identity => collect(&self.identity),
            EntryKind::Note => collect(&self.note),
            EntryKind::SshKey => collect(&self.ssh_key),
        }
    }

    fn normalize_list<T: EntryRecord>(list: &mut [T]) {
        let now = Utc::now();
        for entry in list.iter_mut() {
            let base: &mut EntryBase = entry.base_mut();
            if base.id.is_empty() {
                base.id = Uuid::new_v4().to_string();
            }
            base.kind = Some(T::KIND);
            if base.created_at.is_none() {
                base.created_at = Some(now);
            }
            if base.updated_at.is_none() {
                base.updated_at = base.created_at;
            }
        }
    }
}

/// The structured secret data held by a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultPayload {
    pub version: u32,
    pub name: String,
    pub folders: Vec<Folder>,
    pub entries: EntriesByType,
}

impl VaultPayload {
    /// Empty, normalized payload.
    pub fn new() -> Self {
        let mut payload = Self::default();
        payload.normalize();
        payload
    }

    /// Fill in defaults left missing by older or partial payloads.
    ///
    /// # Postconditions
    /// - `version` and `name` are set
    /// - Every folder and entry has an id
    /// - Every entry's `kind` matches the list it lives in
    pub fn normalize(&mut self) {
        if self.version == 0 {
            self.version = PAYLOAD_VERSION;
        }
        if self.name.trim().is_empty() {
            self.name = DEFAULT_VAULT_NAME.to_string();
        }
        for folder in &mut self.folders {
            if folder.id.is_empty() {
                folder.id = Uuid::new_v4().to_string();
            }
        }

        EntriesByType::normalize_list(&mut self.entries.login);
        EntriesByType::normalize_list(&mut self.entries.card);
        EntriesByType::normalize_list(&mut self.entries.identity);
        EntriesByType::normalize_list(&mut self.entries.note);
        EntriesByType::normalize_list(&mut self.entries.ssh_key);
    }

    /// Check whether a folder with `id` exists.
    pub fn has_folder(&self, id: &str) -> bool {
        self.folders.iter().any(|f| f.id == id)
    }

    /// Create a folder and return its id.
    pub fn add_folder(&mut self, name: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.folders.push(Folder {
            id: id.clone(),
            name: name.into(),
        });
        id
    }

    /// Serialize for encryption.
    ///
    /// Field order is fixed and every collection is a list, so equal payloads
    /// always produce equal bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize decrypted bytes and normalize the result.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut payload: Self = serde_json::from_slice(bytes)?;
        payload.normalize();
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgervault_common::Error;
    use proptest::prelude::*;

    #[test]
    fn test_new_payload_is_normalized() {
        let payload = VaultPayload::new();
        assert_eq!(payload.version, PAYLOAD_VERSION);
        assert_eq!(payload.name, DEFAULT_VAULT_NAME);
        assert!(payload.entries.is_empty());
    }

    #[test]
    fn test_normalize_fills_missing_lists_and_ids() {
        let raw = br#"{"name":"Mine","entries":{"note":[{"entryName":"n"}]}}"#;
        let payload = VaultPayload::from_bytes(raw).unwrap();

        assert_eq!(payload.name, "Mine");
        assert!(payload.folders.is_empty());
        assert!(payload.entries.login.is_empty());

        let note = &payload.entries.note[0];
        assert!(!note.base.id.is_empty());
        assert_eq!(note.base.kind, Some(EntryKind::Note));
        assert!(note.base.created_at.is_some());
    }

    #[test]
    fn test_normalize_corrects_misfiled_kind() {
        let raw = br#"{"entries":{"card":[{"id":"c1","kind":"login"}]}}"#;
        let payload = VaultPayload::from_bytes(raw).unwrap();
        assert_eq!(payload.entries.card[0].base.kind, Some(EntryKind::Card));
        assert_eq!(payload.entries.card[0].base.id, "c1");
    }

    #[test]
    fn test_serialization_deterministic() {
        let mut payload = VaultPayload::new();
        payload.add_folder("Work");
        payload.entries.login.push(LoginEntry {
            base: EntryBase::named("Site"),
            ..LoginEntry::default()
        });
        payload.normalize();

        let a = payload.to_bytes().unwrap();
        let b = payload.clone().to_bytes().unwrap();
        assert_eq!(a, b);
        assert_eq!(VaultPayload::from_bytes(&a).unwrap(), payload);
    }

    #[test]
    fn test_malformed_bytes() {
        assert!(matches!(
            VaultPayload::from_bytes(b"not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_counts_and_views() {
        let mut payload = VaultPayload::new();
        payload.entries.note.push(NoteEntry::default());
        payload.entries.note.push(NoteEntry::default());
        payload.entries.ssh_key.push(SshKeyEntry::default());

        assert_eq!(payload.entries.count(EntryKind::Note), 2);
        assert_eq!(payload.entries.len(), 3);
        assert_eq!(payload.entries.of_kind(EntryKind::SshKey).len(), 1);
    }
    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(names in proptest::collection::vec("[a-zA-Z0-9 ]{0,12}", 0..8)) {
            let mut payload = VaultPayload::default();
            for name in &names {
                payload.entries.note.push(NoteEntry {
                    base: EntryBase::named(name.clone()),
                    ..NoteEntry::default()
                });
            }

            payload.normalize();
            let once = payload.clone();
            payload.normalize();

            prop_assert_eq!(&payload, &once);
            prop_assert_eq!(payload.entries.count(EntryKind::Note), names.len());
            prop_assert!(payload.entries.note.iter().all(|n| !n.base.id.is_empty()));
        }
    }
}

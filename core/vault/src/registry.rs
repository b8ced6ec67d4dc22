//! Entry registry: kind → factory and kind → handler.
//!
//! The registry is an ordinary value. Build it once at startup with
//! [`EntryRegistry::with_defaults`] and hand it to whatever needs it.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::entry::{
    CardEntry, Entry, EntryKind, EntryRecord, IdentityEntry, LoginEntry, NoteEntry, SshKeyEntry,
};
use crate::payload::VaultPayload;
use ledgervault_common::{Error, Result, UserId};

/// Produces a blank entry that raw bytes are decoded into.
pub type EntryFactory = Box<dyn Fn() -> Entry + Send + Sync>;

/// Add/Edit/Trash/Restore for one entry kind.
///
/// Handlers operate on a payload borrowed for the duration of one call.
/// They never mark the session dirty; the caller commits the mutated payload
/// back through the session manager.
pub trait EntryHandler: Send + Sync {
    /// Kind this handler manages.
    fn kind(&self) -> EntryKind;

    /// Append `entry` under a freshly generated id and return that id.
    ///
    /// # Errors
    /// - `Error::Validation` if the entry is of another kind, has no name,
    ///   or references an unknown folder
    fn add(&self, user: &UserId, vault: &mut VaultPayload, entry: Entry) -> Result<String>;

    /// Replace the entry with the same id in place.
    ///
    /// # Errors
    /// - `Error::NotFound` if no entry has that id
    fn edit(&self, user: &UserId, vault: &mut VaultPayload, entry: Entry) -> Result<()>;

    /// Set the trashed flag.
    ///
    /// # Errors
    /// - `Error::NotFound` if no entry has that id
    fn trash(&self, user: &UserId, vault: &mut VaultPayload, entry_id: &str) -> Result<()>;

    /// Clear the trashed flag.
    ///
    /// # Errors
    /// - `Error::NotFound` if no entry has that id
    fn restore(&self, user: &UserId, vault: &mut VaultPayload, entry_id: &str) -> Result<()>;
}

/// Handler shared by every [`EntryRecord`] type.
pub struct KindHandler<T> {
    _kind: PhantomData<fn() -> T>,
}

impl<T: EntryRecord> KindHandler<T> {
    pub fn new() -> Self {
        Self { _kind: PhantomData }
    }

    fn validate(vault: &VaultPayload, entry: &T) -> Result<()> {
        let base = entry.base();
        if base.entry_name.trim().is_empty() {
            return Err(Error::Validation("Entry name cannot be empty".to_string()));
        }
        if let Some(folder_id) = &base.folder_id {
            if !vault.has_folder(folder_id) {
                return Err(Error::Validation(format!("Unknown folder: {}", folder_id)));
            }
        }
        Ok(())
    }

    fn find_mut<'a>(vault: &'a mut VaultPayload, entry_id: &str) -> Result<&'a mut T> {
        T::list_mut(&mut vault.entries)
            .iter_mut()
            .find(|e| e.base().id == entry_id)
            .ok_or_else(|| Error::NotFound(format!("{} entry not found: {}", T::KIND, entry_id)))
    }

    fn set_trashed(vault: &mut VaultPayload, entry_id: &str, trashed: bool) -> Result<()> {
        let entry = Self::find_mut(vault, entry_id)?;
        let base = entry.base_mut();
        base.trashed = trashed;
        base.updated_at = Some(Utc::now());
        Ok(())
    }
}

impl<T: EntryRecord> Default for KindHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EntryRecord> EntryHandler for KindHandler<T> {
    fn kind(&self) -> EntryKind {
        T::KIND
    }

    fn add(&self, user: &UserId, vault: &mut VaultPayload, entry: Entry) -> Result<String> {
        let mut record = T::from_entry(entry)?;
        Self::validate(vault, &record)?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let base = record.base_mut();
        base.id = id.clone();
        base.kind = Some(T::KIND);
        base.created_at = Some(now);
        base.updated_at = Some(now);

        T::list_mut(&mut vault.entries).push(record);
        debug!(user_id = %user, kind = T::KIND.as_str(), entry_id = %id, "Entry added");
        Ok(id)
    }

    fn edit(&self, user: &UserId, vault: &mut VaultPayload, entry: Entry) -> Result<()> {
        let mut record = T::from_entry(entry)?;
        Self::validate(vault, &record)?;

        let entry_id = record.base().id.clone();
        let existing = Self::find_mut(vault, &entry_id)?;
        let created_at = existing.base().created_at;

        let base = record.base_mut();
        base.kind = Some(T::KIND);
        base.created_at = created_at;
        base.updated_at = Some(Utc::now());
        *existing = record;

        debug!(user_id = %user, kind = T::KIND.as_str(), entry_id = %entry_id, "Entry edited");
        Ok(())
    }

    fn trash(&self, user: &UserId, vault: &mut VaultPayload, entry_id: &str) -> Result<()> {
        Self::set_trashed(vault, entry_id, true)?;
        debug!(user_id = %user, kind = T::KIND.as_str(), entry_id, "Entry trashed");
        Ok(())
    }

    fn restore(&self, user: &UserId, vault: &mut VaultPayload, entry_id: &str) -> Result<()> {
        Self::set_trashed(vault, entry_id, false)?;
        debug!(user_id = %user, kind = T::KIND.as_str(), entry_id, "Entry restored");
        Ok(())
    }
}

/// Registry of entry factories and handlers keyed by kind.
pub struct EntryRegistry {
    factories: HashMap<EntryKind, EntryFactory>,
    handlers: HashMap<EntryKind, Arc<dyn EntryHandler>>,
}

impl EntryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    /// Registry with a factory and handler for every built-in kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_kind::<LoginEntry>();
        registry.register_kind::<CardEntry>();
        registry.register_kind::<IdentityEntry>();
        registry.register_kind::<NoteEntry>();
        registry.register_kind::<SshKeyEntry>();
        registry
    }

    fn register_kind<T: EntryRecord>(&mut self) {
        self.register(T::KIND, Arc::new(KindHandler::<T>::new()));
        self.register_factory(T::KIND, Box::new(|| Entry::blank(T::KIND)));
    }

    /// Register a handler, replacing any previous one for `kind`.
    pub fn register(&mut self, kind: EntryKind, handler: Arc<dyn EntryHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Register a factory, replacing any previous one for `kind`.
    pub fn register_factory(&mut self, kind: EntryKind, factory: EntryFactory) {
        self.factories.insert(kind, factory);
    }

    /// Get the handler for `kind`.
    ///
    /// # Errors
    /// - `Error::NotFound` if no handler is registered
    pub fn handler_for(&self, kind: EntryKind) -> Result<Arc<dyn EntryHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No handler registered for {}", kind)))
    }

    /// Decode raw JSON bytes as an entry of the kind named by `tag`.
    ///
    /// The kind's factory supplies a blank entry; fields present in `raw`
    /// overwrite it and absent ones keep the factory's values.
    ///
    /// # Errors
    /// - `Error::UnknownEntryKind` if `tag` names no registered kind
    /// - `Error::Serialization` if `raw` is not a JSON object of that kind
    pub fn unmarshal_entry(&self, tag: &str, raw: &[u8]) -> Result<Entry> {
        let kind: EntryKind = tag.parse()?;
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| Error::UnknownEntryKind(tag.to_string()))?;

        let mut merged = factory().to_value()?;
        let fields = match serde_json::from_slice::<Value>(raw)? {
            Value::Object(fields) => fields,
            _ => {
                return Err(Error::Serialization(format!(
                    "{} entry must be a JSON object",
                    kind
                )))
            }
        };
        if let Value::Object(target) = &mut merged {
            target.extend(fields);
        }

        let mut entry = Entry::from_value(kind, merged)?;
        entry.base_mut().kind = Some(kind);
        Ok(entry)
    }

    /// Kinds with a registered handler.
    pub fn kinds(&self) -> Vec<EntryKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl Default for EntryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryBase;

    fn user() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn login(name: &str) -> Entry {
        Entry::Login(LoginEntry {
            base: EntryBase::named(name),
            username: "alice".to_string(),
            ..LoginEntry::default()
        })
    }

    #[test]
    fn test_add_generates_fresh_ids() {
        let registry = EntryRegistry::with_defaults();
        let handler = registry.handler_for(EntryKind::Login).unwrap();
        let mut vault = VaultPayload::new();

        let mut preset = login("Site A");
        preset.base_mut().id = "caller-chosen".to_string();
        let id1 = handler.add(&user(), &mut vault, preset).unwrap();
        let id2 = handler.add(&user(), &mut vault, login("Site B")).unwrap();

        assert_ne!(id1, "caller-chosen");
        assert_ne!(id1, id2);
        assert_eq!(vault.entries.login.len(), 2);
        assert_eq!(vault.entries.login[0].base.entry_name, "Site A");
        assert_eq!(vault.entries.login[0].base.kind, Some(EntryKind::Login));
    }

    #[test]
    fn test_add_rejects_wrong_kind_and_unknown_folder() {
        let registry = EntryRegistry::with_defaults();
        let handler = registry.handler_for(EntryKind::Card).unwrap();
        let mut vault = VaultPayload::new();

        let result = handler.add(&user(), &mut vault, login("Site"));
        assert!(matches!(result, Err(Error::Validation(_))));

        let mut card = Entry::blank(EntryKind::Card);
        card.base_mut().entry_name = "Visa".to_string();
        card.base_mut().folder_id = Some("missing".to_string());
        let result = handler.add(&user(), &mut vault, card);
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(vault.entries.card.is_empty());
    }

    #[test]
    fn test_edit_replaces_in_place() {
        let registry = EntryRegistry::with_defaults();
        let handler = registry.handler_for(EntryKind::Login).unwrap();
        let mut vault = VaultPayload::new();
        let id = handler.add(&user(), &mut vault, login("Old")).unwrap();
        handler.add(&user(), &mut vault, login("Other")).unwrap();
        let created_at = vault.entries.login[0].base.created_at;

        let mut updated = login("New");
        updated.base_mut().id = id.clone();
        handler.edit(&user(), &mut vault, updated).unwrap();

        assert_eq!(vault.entries.login.len(), 2);
        assert_eq!(vault.entries.login[0].base.id, id);
        assert_eq!(vault.entries.login[0].base.entry_name, "New");
        assert_eq!(vault.entries.login[0].base.created_at, created_at);
    }

    #[test]
    fn test_missing_ids_are_not_found() {
        let registry = EntryRegistry::with_defaults();
        let handler = registry.handler_for(EntryKind::Note).unwrap();
        let mut vault = VaultPayload::new();

        let mut note = Entry::blank(EntryKind::Note);
        note.base_mut().entry_name = "n".to_string();
        note.base_mut().id = "nope".to_string();

        assert!(matches!(
            handler.edit(&user(), &mut vault, note),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            handler.trash(&user(), &mut vault, "nope"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            handler.restore(&user(), &mut vault, "nope"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_trash_and_restore_toggle_flag() {
        let registry = EntryRegistry::with_defaults();
        let handler = registry.handler_for(EntryKind::Login).unwrap();
        let mut vault = VaultPayload::new();
        let id = handler.add(&user(), &mut vault, login("Site")).unwrap();

        handler.trash(&user(), &mut vault, &id).unwrap();
        assert!(vault.entries.login[0].base.trashed);
        assert_eq!(vault.entries.login.len(), 1);

        handler.restore(&user(), &mut vault, &id).unwrap();
        assert!(!vault.entries.login[0].base.trashed);
    }

    #[test]
    fn test_handler_for_unregistered_kind() {
        let registry = EntryRegistry::new();
        assert!(matches!(
            registry.handler_for(EntryKind::Login),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = EntryRegistry::with_defaults();
        registry.register_factory(
            EntryKind::Note,
            Box::new(|| {
                let mut entry = Entry::blank(EntryKind::Note);
                entry.base_mut().is_draft = true;
                entry
            }),
        );

        let entry = registry.unmarshal_entry("note", br#"{"entryName":"n"}"#).unwrap();
        assert!(entry.base().is_draft);

        let entry = registry
            .unmarshal_entry("note", br#"{"entryName":"n","isDraft":false}"#)
            .unwrap();
        assert!(!entry.base().is_draft);
    }

    #[test]
    fn test_unmarshal_typed_entry() {
        let registry = EntryRegistry::with_defaults();
        let entry = registry
            .unmarshal_entry("ssh_key", br#"{"entryName":"deploy","publicKey":"ssh-ed25519 AAA"}"#)
            .unwrap();

        assert_eq!(entry.kind(), EntryKind::SshKey);
        assert_eq!(entry.base().kind, Some(EntryKind::SshKey));
        match entry {
            Entry::SshKey(key) => assert_eq!(key.public_key, "ssh-ed25519 AAA"),
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_distinguishable_from_malformed() {
        let registry = EntryRegistry::with_defaults();

        let unknown = registry.unmarshal_entry("bogus", br#"{"entryName":"x"}"#);
        assert!(matches!(unknown, Err(Error::UnknownEntryKind(_))));

        let malformed = registry.unmarshal_entry("login", b"{not json");
        assert!(matches!(malformed, Err(Error::Serialization(_))));

        let not_object = registry.unmarshal_entry("login", b"[1,2]");
        assert!(matches!(not_object, Err(Error::Serialization(_))));

        assert!(unknown.unwrap_err().is_validation());
        assert!(malformed.unwrap_err().is_validation());
    }

    #[test]
    fn test_unmarshal_without_factory() {
        let registry = EntryRegistry::new();
        assert!(matches!(
            registry.unmarshal_entry("login", b"{}"),
            Err(Error::UnknownEntryKind(_))
        ));
    }

    #[test]
    fn test_default_kinds() {
        assert_eq!(EntryRegistry::with_defaults().kinds(), EntryKind::ALL.to_vec());
    }
}

//! Typed vault entries.
//!
//! Every entry kind shares [`EntryBase`] and adds its own fields. The set of
//! kinds is closed: [`Entry`] is a sum type over them and dispatch happens by
//! matching on [`EntryKind`], never by downcasting.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::payload::EntriesByType;
use ledgervault_common::{Error, Result};

/// Tag identifying an entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Login,
    Card,
    Identity,
    Note,
    SshKey,
}

impl EntryKind {
    /// All kinds, in payload order.
    pub const ALL: [EntryKind; 5] = [
        EntryKind::Login,
        EntryKind::Card,
        EntryKind::Identity,
        EntryKind::Note,
        EntryKind::SshKey,
    ];

    /// The wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Login => "login",
            EntryKind::Card => "card",
            EntryKind::Identity => "identity",
            EntryKind::Note => "note",
            EntryKind::SshKey => "ssh_key",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "login" => Ok(EntryKind::Login),
            "card" => Ok(EntryKind::Card),
            "identity" => Ok(EntryKind::Identity),
            "note" => Ok(EntryKind::Note),
            "ssh_key" | "ssh-key" => Ok(EntryKind::SshKey),
            other => Err(Error::UnknownEntryKind(other.to_string())),
        }
    }
}

/// User-defined name/value pair attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomField {
    pub name: String,
    pub value: String,
    /// Render masked in clients.
    pub hidden: bool,
}

/// Fields shared by every entry kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryBase {
    /// Assigned on creation, never reused.
    pub id: String,
    pub entry_name: String,
    #[serde(rename = "folderID", skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntryKind>,
    pub custom_fields: Vec<CustomField>,
    /// Soft-delete flag.
    pub trashed: bool,
    pub is_draft: bool,
    pub is_favorite: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EntryBase {
    /// Base with only a display name set.
    pub fn named(entry_name: impl Into<String>) -> Self {
        Self {
            entry_name: entry_name.into(),
            ..Self::default()
        }
    }
}

/// Website or application credential.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub username: String,
    pub password: String,
    pub uris: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totp: Option<String>,
}

/// Payment card.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CardEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub cardholder_name: String,
    pub brand: String,
    pub number: String,
    pub exp_month: String,
    pub exp_year: String,
    pub code: String,
}

/// Personal identity document details.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub company: String,
}

/// Free-form secure note.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoteEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub content: String,
}

/// SSH keypair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SshKeyEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub public_key: String,
    pub private_key: String,
    pub fingerprint: String,
}

/// An entry of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Login(LoginEntry),
    Card(CardEntry),
    Identity(IdentityEntry),
    Note(NoteEntry),
    SshKey(SshKeyEntry),
}

impl Entry {
    /// Blank entry of the given kind.
    pub fn blank(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Login => Entry::Login(LoginEntry::default()),
            EntryKind::Card => Entry::Card(CardEntry::default()),
            EntryKind::Identity => Entry::Identity(IdentityEntry::default()),
            EntryKind::Note => Entry::Note(NoteEntry::default()),
            EntryKind::SshKey => Entry::SshKey(SshKeyEntry::default()),
        }
    }

    /// Kind of this entry, derived from the variant.
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Login(_) => EntryKind::Login,
            Entry::Card(_) => EntryKind::Card,
            Entry::Identity(_) => EntryKind::Identity,
            Entry::Note(_) => EntryKind::Note,
            Entry::SshKey(_) => EntryKind::SshKey,
        }
    }

    pub fn base(&self) -> &EntryBase {
        match self {
            Entry::Login(e) => &e.base,
            Entry::Card(e) => &e.base,
            Entry::Identity(e) => &e.base,
            Entry::Note(e) => &e.base,
            Entry::SshKey(e) => &e.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut EntryBase {
        match self {
            Entry::Login(e) => &mut e.base,
            Entry::Card(e) => &mut e.base,
            Entry::Identity(e) => &mut e.base,
            Entry::Note(e) => &mut e.base,
            Entry::SshKey(e) => &mut e.base,
        }
    }

    pub fn id(&self) -> &str {
        &self.base().id
    }

    /// Serialize the variant's fields as a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        let value = match self {
            Entry::Login(e) => serde_json::to_value(e),
            Entry::Card(e) => serde_json::to_value(e),
            Entry::Identity(e) => serde_json::to_value(e),
            Entry::Note(e) => serde_json::to_value(e),
            Entry::SshKey(e) => serde_json::to_value(e),
        };
        Ok(value?)
    }

    /// Deserialize a JSON value as an entry of `kind`.
    pub fn from_value(kind: EntryKind, value: serde_json::Value) -> Result<Self> {
        let entry = match kind {
            EntryKind::Login => Entry::Login(serde_json::from_value(value)?),
            EntryKind::Card => Entry::Card(serde_json::from_value(value)?),
            EntryKind::Identity => Entry::Identity(serde_json::from_value(value)?),
            EntryKind::Note => Entry::Note(serde_json::from_value(value)?),
            EntryKind::SshKey => Entry::SshKey(serde_json::from_value(value)?),
        };
        Ok(entry)
    }
}

/// A concrete entry type stored in its own list of [`EntriesByType`].
///
/// Lets one generic handler implement add/edit/trash/restore for every kind.
pub trait EntryRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntryKind;

    fn base(&self) -> &EntryBase;
    fn base_mut(&mut self) -> &mut EntryBase;

    /// The payload list holding entries of this kind.
    fn list(entries: &EntriesByType) -> &Vec<Self>;
    fn list_mut(entries: &mut EntriesByType) -> &mut Vec<Self>;

    fn into_entry(self) -> Entry;

    /// Unwrap an [`Entry`] of this kind.
    ///
    /// # Errors
    /// - `Error::Validation` if the entry is of another kind
    fn from_entry(entry: Entry) -> Result<Self>;
}

macro_rules! entry_record {
    ($ty:ty, $variant:ident, $field:ident) => {
        impl EntryRecord for $ty {
            const KIND: EntryKind = EntryKind::$variant;

            fn base(&self) -> &EntryBase {
                &self.base
            }

            fn base_mut(&mut self) -> &mut EntryBase {
                &mut self.base
            }

            fn list(entries: &EntriesByType) -> &Vec<Self> {
                &entries.$field
            }

            fn list_mut(entries: &mut EntriesByType) -> &mut Vec<Self> {
                &mut entries.$field
            }

            fn into_entry(self) -> Entry {
                Entry::$variant(self)
            }

            fn from_entry(entry: Entry) -> Result<Self> {
                match entry {
                    Entry::$variant(inner) => Ok(inner),
                    other => Err(Error::Validation(format!(
                        "Expected {} entry, got {}",
                        EntryKind::$variant,
                        other.kind()
                    ))),
                }
            }
        }
    };
}

entry_record!(LoginEntry, Login, login);
entry_record!(CardEntry, Card, card);
entry_record!(IdentityEntry, Identity, identity);
entry_record!(NoteEntry, Note, note);
entry_record!(SshKeyEntry, SshKey, ssh_key);

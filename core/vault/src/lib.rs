//! Vault engine for LedgerVault.
//!
//! This module provides:
//! - The typed entry model and the decrypted vault payload
//! - The entry registry dispatching Add/Edit/Trash/Restore per kind
//! - Per-user sessions and the session manager owning them
//! - Signed audit commit envelopes
//! - Vault metadata and session repository contracts
//!
//! # Architecture
//! Handlers mutate a payload borrowed from the session for one call; the
//! session manager decides when that mutation becomes visible and marks the
//! session dirty. Nothing in this crate performs network I/O.

pub mod commit;
pub mod entry;
pub mod manager;
pub mod payload;
pub mod registry;
pub mod repository;
pub mod session;

pub use commit::{CommitEnvelope, CommitTarget, EntryMutation, MutationAction};
pub use entry::{
    CardEntry, CustomField, Entry, EntryBase, EntryKind, EntryRecord, IdentityEntry, LoginEntry,
    NoteEntry, SshKeyEntry,
};
pub use manager::{SessionHandle, SessionManager};
pub use payload::{EntriesByType, Folder, VaultPayload};
pub use registry::{EntryFactory, EntryHandler, EntryRegistry, KindHandler};
pub use repository::{
    MemorySessionRepository, MemoryVaultRepository, SessionRepository, VaultRecord,
    VaultRepository,
};
pub use session::{RuntimeContext, Session, SessionSnapshot, SessionState};

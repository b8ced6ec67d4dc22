//! LedgerVault application layer
//!
//! Wires the vault, storage and sync crates into one service:
//! - [`VaultService`] for open/CRUD/sync
//! - SQLite repositories for vault metadata and session snapshots
//! - HTTP audit client for commit envelopes
//! - Startup rehydration of stored sessions

pub mod audit;
pub mod config;
pub mod rehydrate;
pub mod service;
pub mod sqlite;

pub use audit::HttpAuditClient;
pub use config::{
    AppConfig, AuditConfig, LedgerConfig, LedgerKind, PipelineSettings, StorageConfig,
    WorkerSettings,
};
pub use rehydrate::{rehydrate, spawn_rehydration, RehydrationReport};
pub use service::{SessionStatus, VaultService};
pub use sqlite::SqliteRepository;

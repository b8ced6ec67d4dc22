//! Content store and ledger abstractions for LedgerVault.
//!
//! This module provides trait-based interfaces for the two external systems
//! the vault engine publishes to, plus a store registry for dynamic
//! resolution by name:
//! - [`ContentStore`]: content-addressable blob storage (local disk, object
//!   store, IPFS node...)
//! - [`LedgerAnchor`]: append-only public ledger that timestamps content ids
//!
//! # Design Principles
//! - Provider isolation: no store- or ledger-specific logic in vault or sync modules
//! - Async operations: all I/O operations are async
//! - Content addressing: identical bytes always yield the identical id, so
//!   uploads are idempotent. Anchoring is not.

pub mod ledger;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use ledger::{AnchorRecord, FileLedger, MemoryLedger};
pub use local::LocalContentStore;
pub use memory::MemoryContentStore;
pub use provider::{content_id_for, ContentStore, LedgerAnchor};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};

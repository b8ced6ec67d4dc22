//! LedgerVault Sync Engine
//!
//! Moves vault state out of memory:
//! - [`SyncPipeline`] encrypts the session vault, stores the blob, anchors
//!   its content id on the ledger and records the result
//! - [`PendingCommitWorker`] delivers signed commit envelopes to the audit
//!   service, retrying per user with capped backoff
//! - Retry strategy with exponential backoff shared by both

pub mod audit;
pub mod pending;
pub mod pipeline;
pub mod progress;
pub mod retry;

pub use audit::AuditClient;
pub use pending::{PendingCommit, PendingCommitWorker, TickReport, WorkerConfig};
pub use pipeline::{PipelineConfig, SyncError, SyncOutcome, SyncPipeline};
pub use progress::{ChannelProgress, NoopProgress, ProgressSink, SyncProgress, SyncStage};
pub use retry::{RetryConfig, RetryExecutor};

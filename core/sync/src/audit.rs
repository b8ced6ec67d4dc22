//! Audit/trace service contract.

use async_trait::async_trait;

use ledgervault_common::Result;
use ledgervault_vault::CommitEnvelope;

/// External service accepting signed commit envelopes.
///
/// Delivery is at-least-once: the service must treat a repeated envelope
/// (same [`CommitEnvelope::identity`]) as a duplicate, not a new commit.
#[async_trait]
pub trait AuditClient: Send + Sync {
    /// Submit one envelope.
    ///
    /// # Errors
    /// - `Error::ExternalCommit` if the service is unreachable or rejects it
    async fn submit(&self, envelope: &CommitEnvelope) -> Result<()>;
}

//! Startup rehydration of stored sessions.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ledgervault_common::Result;
use ledgervault_sync::PendingCommitWorker;
use ledgervault_vault::SessionManager;

/// Counts from one rehydration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RehydrationReport {
    pub sessions: usize,
    pub pending_commits: usize,
    pub cancelled: bool,
}

/// Load every stored snapshot into `sessions` and hand their pending
/// commits to `worker`.
///
/// Users that already have a live session are skipped. Cancellation is
/// checked between users.
pub async fn rehydrate(
    sessions: &SessionManager,
    worker: &PendingCommitWorker,
    cancel: &CancellationToken,
) -> Result<RehydrationReport> {
    let snapshots = sessions.repository().get_all_sessions().await?;
    let mut report = RehydrationReport::default();

    let mut users: Vec<_> = snapshots.into_iter().collect();
    users.sort_by(|a, b| a.0.cmp(&b.0));

    for (user_id, snapshot) in users {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let pending = sessions.restore_snapshot(snapshot).await;
        report.sessions += 1;
        report.pending_commits += pending.len();
        worker.restore(&user_id, pending).await;
    }

    info!(
        sessions = report.sessions,
        pending_commits = report.pending_commits,
        cancelled = report.cancelled,
        "Session rehydration finished"
    );
    Ok(report)
}

/// Run [`rehydrate`] as a background task.
pub fn spawn_rehydration(
    sessions: Arc<SessionManager>,
    worker: Arc<PendingCommitWorker>,
    cancel: CancellationToken,
) -> JoinHandle<Option<RehydrationReport>> {
    tokio::spawn(async move {
        match rehydrate(&sessions, &worker, &cancel).await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "Session rehydration failed");
                None
            }
        }
    })
}

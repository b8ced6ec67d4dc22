//! Background delivery of audit commit envelopes.
//!
//! CRUD paths hand envelopes to [`PendingCommitWorker::dispatch`], which never
//! waits on the network. The worker's run loop makes one immediate delivery
//! attempt per envelope; failures join the user's pending queue, which is
//! retried on every tick in original order. A user whose queue survives a
//! tick cools down for one interval, doubling per failed tick up to a cap,
//! and the cooldown resets as soon as the queue empties.
//!
//! Locks: the worker never holds its queue lock while calling into the
//! session manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::AuditClient;
use crate::retry::RetryConfig;
use ledgervault_common::{Error, Result, UserId};
use ledgervault_vault::{CommitEnvelope, SessionManager};

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Tick interval and base backoff.
    pub interval: Duration,
    /// Backoff cap as a multiple of `interval`.
    pub max_backoff_multiplier: u32,
    /// Failed deliveries before an envelope is dead-lettered. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Capacity of the dispatch channel.
    pub channel_capacity: usize,
    /// Bound on each audit service call.
    pub call_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            max_backoff_multiplier: 30,
            max_attempts: None,
            channel_capacity: 256,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    fn backoff(&self) -> RetryConfig {
        RetryConfig::new(0)
            .with_initial_delay(self.interval)
            .with_max_delay(self.interval * self.max_backoff_multiplier.max(1))
            .with_backoff_multiplier(2.0)
            .with_jitter(false)
    }
}

/// An undelivered envelope and how often delivery failed.
#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub envelope: CommitEnvelope,
    pub attempts: u32,
}

/// Counts from one retry tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub users: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

#[derive(Default)]
struct UserQueue {
    commits: Vec<PendingCommit>,
    failed_ticks: u32,
    backoff: Option<Duration>,
    next_attempt_at: Option<Instant>,
}

#[derive(Default)]
struct QueueState {
    queues: HashMap<UserId, UserQueue>,
    dead_letters: HashMap<UserId, Vec<PendingCommit>>,
}

struct Dispatch {
    user_id: UserId,
    envelope: CommitEnvelope,
}

/// Per-user retrying delivery of commit envelopes.
pub struct PendingCommitWorker {
    client: Option<Arc<dyn AuditClient>>,
    sessions: Arc<SessionManager>,
    config: WorkerConfig,
    state: Mutex<QueueState>,
    tick_lock: Mutex<()>,
    dispatch_tx: mpsc::Sender<Dispatch>,
    dispatch_rx: Mutex<Option<mpsc::Receiver<Dispatch>>>,
}

impl PendingCommitWorker {
    /// Create a worker. With `client` set to `None` the audit service is
    /// treated as absent and every envelope is queued.
    pub fn new(
        client: Option<Arc<dyn AuditClient>>,
        sessions: Arc<SessionManager>,
        config: WorkerConfig,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            client,
            sessions,
            config,
            state: Mutex::new(QueueState::default()),
            tick_lock: Mutex::new(()),
            dispatch_tx,
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Hand an envelope to the worker without waiting on the audit service.
    ///
    /// If the dispatch channel is full the envelope goes straight to the
    /// pending queue for the next tick.
    pub async fn dispatch(&self, user_id: &UserId, envelope: CommitEnvelope) {
        let dispatch = Dispatch {
            user_id: user_id.clone(),
            envelope,
        };
        if let Err(err) = self.dispatch_tx.try_send(dispatch) {
            let dispatch = match err {
                mpsc::error::TrySendError::Full(d) | mpsc::error::TrySendError::Closed(d) => d,
            };
            debug!(user_id = %user_id, "Dispatch channel unavailable, queueing envelope");
            self.enqueue(&dispatch.user_id, dispatch.envelope, 0).await;
        }
    }

    /// Make one delivery attempt now, queueing the envelope on failure.
    pub async fn deliver_now(&self, user_id: &UserId, envelope: CommitEnvelope) {
        match self.send(&envelope).await {
            Ok(()) => debug!(user_id = %user_id, "Commit envelope delivered"),
            Err(err) => {
                debug!(user_id = %user_id, error = %err, "Commit envelope deferred");
                let attempts = if self.client.is_some() { 1 } else { 0 };
                self.enqueue(user_id, envelope, attempts).await;
            }
        }
    }

    /// Re-queue envelopes recovered from a session snapshot.
    ///
    /// They are already recorded in the snapshot, so only the worker queue
    /// is updated.
    pub async fn restore(&self, user_id: &UserId, envelopes: Vec<CommitEnvelope>) {
        if envelopes.is_empty() {
            return;
        }
        let count = envelopes.len();
        let mut state = self.state.lock().await;
        let queue = state.queues.entry(user_id.clone()).or_default();
        queue.commits.extend(envelopes.into_iter().map(|envelope| PendingCommit {
            envelope,
            attempts: 0,
        }));
        debug!(user_id = %user_id, count, "Pending commits restored");
    }

    async fn enqueue(&self, user_id: &UserId, envelope: CommitEnvelope, attempts: u32) {
        {
            let mut state = self.state.lock().await;
            state
                .queues
                .entry(user_id.clone())
                .or_default()
                .commits
                .push(PendingCommit {
                    envelope: envelope.clone(),
                    attempts,
                });
        }

        if let Err(err) = self.sessions.record_pending_commit(user_id, envelope).await {
            warn!(user_id = %user_id, error = %err, "Failed to record pending commit in session");
        }
    }

    async fn send(&self, envelope: &CommitEnvelope) -> Result<()> {
        let Some(client) = &self.client else {
            return Err(Error::ExternalCommit(
                "Audit service not configured".to_string(),
            ));
        };
        match tokio::time::timeout(self.config.call_timeout, client.submit(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "Audit submit exceeded {:?}",
                self.config.call_timeout
            ))),
        }
    }

    /// Retry every due queue once.
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Instant::now()).await
    }

    /// Retry every queue whose cooldown has elapsed at `now`.
    pub async fn tick_at(&self, now: Instant) -> TickReport {
        let _tick = self.tick_lock.lock().await;
        let mut report = TickReport::default();
        if self.client.is_none() {
            return report;
        }

        let batches: Vec<(UserId, Vec<PendingCommit>)> = {
            let state = self.state.lock().await;
            state
                .queues
                .iter()
                .filter(|(_, q)| !q.commits.is_empty())
                .filter(|(_, q)| q.next_attempt_at.map_or(true, |at| at <= now))
                .map(|(user, q)| (user.clone(), q.commits.clone()))
                .collect()
        };

        for (user_id, batch) in batches {
            report.users += 1;
            let mut outcomes = Vec::with_capacity(batch.len());
            for pending in &batch {
                outcomes.push(self.send(&pending.envelope).await.is_ok());
            }

            let (delivered, dead) = self.settle(&user_id, batch, &outcomes, now).await;
            report.delivered += delivered.len();
            report.dead_lettered += dead.len();
            report.failed += outcomes.len() - delivered.len() - dead.len();

            let mut settled = delivered;
            settled.extend(dead);
            if let Err(err) = self.sessions.acknowledge_commits(&user_id, &settled).await {
                warn!(user_id = %user_id, error = %err, "Failed to acknowledge commits in session");
            }
        }

        if report.users > 0 {
            info!(
                users = report.users,
                delivered = report.delivered,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "Pending commit retry tick"
            );
        }
        report
    }

    /// Apply one batch's outcomes to the queue. Returns identities of
    /// delivered and dead-lettered envelopes.
    async fn settle(
        &self,
        user_id: &UserId,
        batch: Vec<PendingCommit>,
        outcomes: &[bool],
        now: Instant,
    ) -> (Vec<String>, Vec<String>) {
        let mut delivered = Vec::new();
        let mut dead = Vec::new();
        let mut retained = Vec::new();
        let mut dead_commits = Vec::new();

        for (mut pending, ok) in batch.into_iter().zip(outcomes.iter().copied()) {
            if ok {
                delivered.push(pending.envelope.identity());
                continue;
            }
            pending.attempts += 1;
            if self
                .config
                .max_attempts
                .is_some_and(|max| pending.attempts >= max)
            {
                warn!(
                    user_id = %user_id,
                    attempts = pending.attempts,
                    envelope = %pending.envelope.identity(),
                    "Commit envelope dead-lettered"
                );
                dead.push(pending.envelope.identity());
                dead_commits.push(pending);
            } else {
                retained.push(pending);
            }
        }

        let mut state = self.state.lock().await;
        if !dead_commits.is_empty() {
            state
                .dead_letters
                .entry(user_id.clone())
                .or_default()
                .extend(dead_commits);
        }

        let Some(queue) = state.queues.get_mut(user_id) else {
            return (delivered, dead);
        };
        // Envelopes queued while the batch was in flight follow it.
        let arrived = queue.commits.split_off(outcomes.len().min(queue.commits.len()));
        retained.extend(arrived);
        queue.commits = retained;

        if queue.commits.is_empty() {
            state.queues.remove(user_id);
            debug!(user_id = %user_id, "Pending queue drained, backoff reset");
        } else {
            let delay = self.config.backoff().delay_for_attempt(queue.failed_ticks);
            queue.failed_ticks += 1;
            queue.backoff = Some(delay);
            queue.next_attempt_at = Some(now + delay);
            debug!(
                user_id = %user_id,
                remaining = queue.commits.len(),
                backoff_secs = delay.as_secs(),
                "Pending queue backing off"
            );
        }
        (delivered, dead)
    }

    /// Envelopes waiting for `user_id`.
    pub async fn queue_len(&self, user_id: &UserId) -> usize {
        let state = self.state.lock().await;
        state.queues.get(user_id).map_or(0, |q| q.commits.len())
    }

    /// Current cooldown for `user_id`, `None` when not backing off.
    pub async fn backoff_for(&self, user_id: &UserId) -> Option<Duration> {
        let state = self.state.lock().await;
        state.queues.get(user_id).and_then(|q| q.backoff)
    }

    /// Envelopes given up on for `user_id`.
    pub async fn dead_letters(&self, user_id: &UserId) -> Vec<PendingCommit> {
        let state = self.state.lock().await;
        state.dead_letters.get(user_id).cloned().unwrap_or_default()
    }

    /// Users with a non-empty queue, sorted.
    pub async fn pending_users(&self) -> Vec<UserId> {
        let state = self.state.lock().await;
        let mut users: Vec<_> = state
            .queues
            .iter()
            .filter(|(_, q)| !q.commits.is_empty())
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Each loop iteration either delivers one dispatched envelope or runs
    /// one tick; cancellation is observed between iterations, never inside a
    /// batch. On exit, envelopes still in the dispatch channel are queued.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let Some(mut rx) = self.dispatch_rx.lock().await.take() else {
            warn!("Pending commit worker already running");
            return;
        };

        info!(
            interval_secs = self.config.interval.as_secs(),
            "Pending commit worker started"
        );

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.config.interval,
            self.config.interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(dispatch) = rx.recv() => {
                    self.deliver_now(&dispatch.user_id, dispatch.envelope).await;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Ok(dispatch) = rx.try_recv() {
            self.enqueue(&dispatch.user_id, dispatch.envelope, 0).await;
            drained += 1;
        }
        info!(drained, "Pending commit worker shutting down");
    }
}

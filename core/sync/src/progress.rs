//! Sync progress reporting.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::trace;

/// Stage of the commit pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Marshaling,
    Encrypting,
    Uploading,
    Anchoring,
    PersistingMetadata,
    Committed,
}

impl SyncStage {
    /// Completion percentage reported when the stage starts.
    pub fn percent(&self) -> u8 {
        match self {
            SyncStage::Marshaling => 10,
            SyncStage::Encrypting => 25,
            SyncStage::Uploading => 50,
            SyncStage::Anchoring => 70,
            SyncStage::PersistingMetadata => 90,
            SyncStage::Committed => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Marshaling => "marshaling",
            SyncStage::Encrypting => "encrypting",
            SyncStage::Uploading => "uploading",
            SyncStage::Anchoring => "anchoring",
            SyncStage::PersistingMetadata => "persisting_metadata",
            SyncStage::Committed => "committed",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{stage, percent}` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub stage: SyncStage,
    pub percent: u8,
}

impl From<SyncStage> for SyncProgress {
    fn from(stage: SyncStage) -> Self {
        Self {
            stage,
            percent: stage.percent(),
        }
    }
}

/// Receiver of sync progress events.
///
/// Called inline by the pipeline, so implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: SyncProgress);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _progress: SyncProgress) {}
}

/// Sink forwarding events into a bounded channel.
///
/// Events are dropped when the channel is full or closed; progress never
/// holds up a commit.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<SyncProgress>,
}

impl ChannelProgress {
    /// Create a sink and the receiver it feeds.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncProgress>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, progress: SyncProgress) {
        if self.tx.try_send(progress).is_err() {
            trace!(stage = %progress.stage, "Progress event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_increases() {
        let stages = [
            SyncStage::Marshaling,
            SyncStage::Encrypting,
            SyncStage::Uploading,
            SyncStage::Anchoring,
            SyncStage::PersistingMetadata,
            SyncStage::Committed,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].percent() < pair[1].percent());
        }
        assert_eq!(SyncStage::Committed.percent(), 100);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_drops() {
        let (sink, mut rx) = ChannelProgress::channel(1);
        sink.report(SyncStage::Marshaling.into());
        sink.report(SyncStage::Encrypting.into());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stage, SyncStage::Marshaling);
        assert_eq!(first.percent, 10);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_progress_wire_shape() {
        let json = serde_json::to_value(SyncProgress::from(SyncStage::PersistingMetadata)).unwrap();
        assert_eq!(json["stage"], "persisting_metadata");
        assert_eq!(json["percent"], 90);
    }
}

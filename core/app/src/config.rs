//! Application configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use ledgervault_common::{Error, Result};
use ledgervault_crypto::KdfParams;
use ledgervault_sync::{PipelineConfig, RetryConfig, WorkerConfig};
use ledgervault_vault::CommitTarget;

/// Content store selection, resolved through the store registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub provider: String,
    pub config: Value,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            config: Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub kind: LedgerKind,
    /// Journal file for the `file` ledger.
    pub path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            kind: LedgerKind::Memory,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub call_timeout_secs: u64,
    pub store_retries: u32,
    pub store_retry_initial_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            store_retries: 2,
            store_retry_initial_ms: 250,
        }
    }
}

impl PipelineSettings {
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            store_retry: RetryConfig::new(self.store_retries)
                .with_initial_delay(Duration::from_millis(self.store_retry_initial_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub interval_secs: u64,
    pub max_backoff_multiplier: u32,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub channel_capacity: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 180,
            max_backoff_multiplier: 30,
            max_attempts: None,
            channel_capacity: 256,
        }
    }
}

impl WorkerSettings {
    pub fn to_worker_config(&self, call_timeout: Duration) -> WorkerConfig {
        WorkerConfig {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            max_backoff_multiplier: self.max_backoff_multiplier,
            max_attempts: self.max_attempts,
            channel_capacity: self.channel_capacity,
            call_timeout,
        }
    }
}

/// Audit service settings. No endpoint means the service is absent and every
/// envelope stays queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub endpoint: Option<Url>,
    pub app_id: String,
    pub repo_id: String,
    pub branch: String,
    pub timeout_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let target = CommitTarget::default();
        Self {
            endpoint: None,
            app_id: target.app_id,
            repo_id: target.repo_id,
            branch: target.branch,
            timeout_secs: 30,
        }
    }
}

impl AuditConfig {
    pub fn commit_target(&self) -> CommitTarget {
        CommitTarget {
            repo_id: self.repo_id.clone(),
            branch: self.branch.clone(),
            app_id: self.app_id.clone(),
            validation_rules: Vec::new(),
        }
    }
}

/// Top-level configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub kdf: KdfParams,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub pipeline: PipelineSettings,
    pub worker: WorkerSettings,
    pub audit: AuditConfig,
    /// SQLite file for vault metadata and session snapshots. In-memory when unset.
    pub database_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::interactive(),
            storage: StorageConfig::default(),
            ledger: LedgerConfig::default(),
            pipeline: PipelineSettings::default(),
            worker: WorkerSettings::default(),
            audit: AuditConfig::default(),
            database_path: None,
        }
    }
}

impl AppConfig {
    /// Configuration rooted in a data directory: SQLite database, local
    /// content store and file ledger all live under `dir`.
    pub fn for_data_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            storage: StorageConfig {
                provider: "local".to_string(),
                config: serde_json::json!({ "root": dir.join("blobs").to_string_lossy() }),
            },
            ledger: LedgerConfig {
                kind: LedgerKind::File,
                path: Some(dir.join("ledger.jsonl")),
            },
            database_path: Some(dir.join("ledgervault.db")),
            ..Self::default()
        }
    }

    /// Load from a JSON file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.to_pipeline_config()
    }

    pub fn worker_config(&self) -> WorkerConfig {
        self.worker
            .to_worker_config(Duration::from_secs(self.audit.timeout_secs))
    }
}

//! HTTP audit service client.

use async_trait::async_trait;
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;
use url::Url;

use ledgervault_common::{Error, Result};
use ledgervault_sync::AuditClient;
use ledgervault_vault::CommitEnvelope;

/// Posts commit envelopes as JSON to a single endpoint.
pub struct HttpAuditClient {
    http: Client,
    endpoint: Url,
}

impl HttpAuditClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("LedgerVault/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ExternalCommit(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AuditClient for HttpAuditClient {
    async fn submit(&self, envelope: &CommitEnvelope) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .json(envelope)
            .send()
            .await
            .map_err(|e| Error::ExternalCommit(format!("Failed to submit commit: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ExternalCommit(format!(
                "Audit service rejected commit: {} - {}",
                status, body
            )));
        }

        debug!(envelope = %envelope.identity(), "Commit accepted by audit service");
        Ok(())
    }
}

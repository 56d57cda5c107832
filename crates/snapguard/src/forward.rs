//! Forwarding remote commands to peer guards over HTTP.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use crate::command::CommandRequest;
use crate::error::{GuardError, Result};
use crate::registry::Endpoint;

/// Header carrying the shared token between guards.
pub const TOKEN_HEADER: &str = "x-snapguard-token";

#[async_trait]
pub trait RemoteForwarder: Send + Sync {
    /// Deliver `request` to the guard at `endpoint`. At most once.
    async fn forward(&self, endpoint: &Endpoint, request: &CommandRequest) -> Result<()>;
}

/// Issues `GET /<command>?node_id=&round_id=` against the peer's network channel.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpForwarder {
    pub fn new(timeout: Duration, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, token })
    }

    pub fn url(endpoint: &Endpoint, request: &CommandRequest) -> String {
        format!(
            "{}/{}?node_id={}&round_id={}",
            endpoint.base_url(),
            request.command,
            request.node_id,
            request.round
        )
    }
}

#[async_trait]
impl RemoteForwarder for HttpForwarder {
    async fn forward(&self, endpoint: &Endpoint, request: &CommandRequest) -> Result<()> {
        let url = Self::url(endpoint, request);
        debug!(%url, "forwarding command");

        let mut req = self.client.get(&url);
        if let Some(token) = &self.token {
            req = req.header(TOKEN_HEADER, token);
        }

        let failed = |reason: String| GuardError::ForwardFailed {
            node_id: request.node_id,
            reason,
        };

        let response = req.send().await.map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("{} returned {}: {}", endpoint, status, body.trim())));
        }

        Ok(())
    }
}

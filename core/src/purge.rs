use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CloudflareConfig;

const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Serialize)]
struct PurgeRequest<'a> {
    files: &'a [String],
}

/// Invalidates CDN copies of feed URLs after they change.
#[derive(Clone)]
pub struct CachePurger {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl CachePurger {
    pub fn new(cfg: &CloudflareConfig) -> Result<Self> {
        Self::with_api(cfg, CLOUDFLARE_API)
    }

    /// Purge through a different API base URL.
    pub fn with_api(cfg: &CloudflareConfig, api: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/zones/{}/purge_cache",
                api.trim_end_matches('/'),
                cfg.zone_id
            ),
            token: cfg.token.clone(),
        })
    }

    pub async fn purge(&self, urls: &[String]) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&PurgeRequest { files: urls })
            .send()
            .await
            .context("failed to send purge request")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("purge failed {}: {}", status, body);
        }
        debug!(count = urls.len(), "purged cached feed URLs");
        Ok(())
    }

    /// Purge and log instead of failing.
    pub async fn purge_logged(&self, feed_id: &str, urls: Vec<String>) {
        if let Err(err) = self.purge(&urls).await {
            warn!(feed_id, error = %err, "cache purge failed");
        }
    }
}

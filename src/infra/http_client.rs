use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::app::ports::SourceFetcher;
use crate::error::{PipelineError, Result};

/// `reqwest`-backed fetcher for the public case dataset.
pub struct HttpSourceFetcher {
    client: reqwest::Client,
}

impl HttpSourceFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpSourceFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String> {
        info!("📡 Fetching dataset from {}", url);
        let t0 = std::time::Instant::now();
        let resp = self.client.get(url).timeout(timeout).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Network {
                cause: format!("GET {} responded with status {}", url, status.as_u16()),
            });
        }
        let text = resp.text().await?;
        debug!(
            "Fetched {} bytes in {:.2}s",
            text.len(),
            t0.elapsed().as_secs_f64()
        );
        Ok(text)
    }
}

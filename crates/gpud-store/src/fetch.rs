//! Model fetching from the file service

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use gpud_core::FetchCause;

/// Fetch timeout sized for multi-gigabyte model blobs.
const FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Downloads a model into a destination directory.
///
/// Implementations write only inside `dest_dir`; the cache owns the
/// temp-dir/rename discipline around the call.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn download(&self, model_id: &str, dest_dir: &Path) -> Result<(), FetchCause>;
}

/// Fetcher backed by the file service's internal model endpoint.
pub struct FileServiceFetcher {
    base_url: String,
    internal_key: String,
    client: reqwest::Client,
}

impl FileServiceFetcher {
    pub fn new(base_url: impl Into<String>, internal_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: {
                let url: String = base_url.into();
                url.trim_end_matches('/').to_string()
            },
            internal_key: internal_key.into(),
            client,
        }
    }
}

#[async_trait]
impl ModelFetcher for FileServiceFetcher {
    async fn download(&self, model_id: &str, dest_dir: &Path) -> Result<(), FetchCause> {
        let url = format!("{}/internal/models/{}", self.base_url, model_id);
        info!(model_id = model_id, url = %url, "fetching model from file service");

        let response = self
            .client
            .get(&url)
            .header("X-Internal-Key", &self.internal_key)
            .send()
            .await
            .map_err(|e| FetchCause::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            error!(model_id = model_id, "file service rejected internal key");
            return Err(FetchCause::Unauthorized);
        }
        if !status.is_success() {
            return Err(FetchCause::Network(format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchCause::Network(e.to_string()))?;

        let target = dest_dir.join(model_id);
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| FetchCause::Io(e.to_string()))?;

        info!(
            model_id = model_id,
            bytes = bytes.len(),
            "model payload written"
        );
        Ok(())
    }
}

//! Local model cache with single-flight fetches

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use gpud_core::{FetchCause, GpudError, GpudResult};

use crate::fetch::ModelFetcher;

/// Model cache manager.
///
/// A cache hit is a present, non-empty directory `base_dir/<model_id>`.
/// Misses trigger at most one fetch per model id at a time; concurrent
/// callers for the same id wait on the in-flight fetch, callers for
/// different ids proceed in parallel. The filesystem is the storage; the
/// in-memory map only caches resolved paths.
pub struct ModelCache {
    base_dir: PathBuf,
    auto_fetch: bool,
    fetcher: Arc<dyn ModelFetcher>,
    /// model_id -> resolved host path
    resolved: RwLock<HashMap<String, PathBuf>>,
    /// model_id -> single-flight fetch lock
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ModelCache {
    pub fn new(base_dir: PathBuf, auto_fetch: bool, fetcher: Arc<dyn ModelFetcher>) -> Self {
        Self {
            base_dir,
            auto_fetch,
            fetcher,
            resolved: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Create the cache directory and register models already on disk.
    pub async fn init(&self) -> GpudResult<()> {
        if !self.base_dir.exists() {
            tokio::fs::create_dir_all(&self.base_dir).await?;
            info!(path = %self.base_dir.display(), "created model cache directory");
        }

        let mut registered = 0usize;
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(".tmp-") {
                // Leftover from an interrupted fetch.
                warn!(path = %path.display(), "removing stale fetch directory");
                let _ = tokio::fs::remove_dir_all(&path).await;
                continue;
            }
            if dir_is_ready(&path) {
                self.resolved
                    .write()
                    .await
                    .insert(name.to_string(), path.clone());
                registered += 1;
            }
        }

        info!(models = registered, "model cache initialized");
        Ok(())
    }

    /// Resolve the host directory for a model, fetching it if needed.
    pub async fn ensure(&self, model_id: &str) -> GpudResult<PathBuf> {
        self.ensure_at(model_id, None).await
    }

    /// Like [`ensure`](Self::ensure), preferring a pre-provisioned host
    /// directory from the catalog when it is already populated.
    pub async fn ensure_at(
        &self,
        model_id: &str,
        configured: Option<&Path>,
    ) -> GpudResult<PathBuf> {
        if let Some(path) = configured {
            if dir_is_ready(path) {
                debug!(model_id = model_id, path = %path.display(), "using configured model path");
                return Ok(path.to_path_buf());
            }
        }

        if let Some(path) = self.lookup(model_id).await {
            return Ok(path);
        }

        if !self.auto_fetch {
            warn!(model_id = model_id, "model not cached and auto-fetch disabled");
            return Err(GpudError::Fetch {
                model_id: model_id.to_string(),
                cause: FetchCause::NotCached,
            });
        }

        let flight = self.flight_lock(model_id).await;
        let _guard = flight.lock().await;

        // Another caller may have completed the fetch while we waited.
        if let Some(path) = self.lookup(model_id).await {
            return Ok(path);
        }

        self.fetch(model_id).await
    }

    /// Cached-path lookup, re-validated against the filesystem.
    async fn lookup(&self, model_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.resolved.read().await.get(model_id) {
            if dir_is_ready(path) {
                return Some(path.clone());
            }
            warn!(model_id = model_id, path = %path.display(), "cached model vanished, will re-fetch");
        }

        let path = self.base_dir.join(model_id);
        if dir_is_ready(&path) {
            self.resolved
                .write()
                .await
                .insert(model_id.to_string(), path.clone());
            return Some(path);
        }
        None
    }

    async fn flight_lock(&self, model_id: &str) -> Arc<Mutex<()>> {
        let mut flights = self.flights.lock().await;
        flights
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Download into a temp dir and atomically rename into place. Partial
    /// output is removed on failure. Caller holds the flight lock.
    async fn fetch(&self, model_id: &str) -> GpudResult<PathBuf> {
        let final_path = self.base_dir.join(model_id);
        let tmp_path = self
            .base_dir
            .join(format!(".tmp-{}-{}", model_id, Uuid::new_v4()));

        tokio::fs::create_dir_all(&tmp_path)
            .await
            .map_err(|e| fetch_io(model_id, &e))?;

        info!(model_id = model_id, "fetching model");

        if let Err(cause) = self.fetcher.download(model_id, &tmp_path).await {
            let _ = tokio::fs::remove_dir_all(&tmp_path).await;
            return Err(GpudError::Fetch {
                model_id: model_id.to_string(),
                cause,
            });
        }

        if !dir_is_ready(&tmp_path) {
            let _ = tokio::fs::remove_dir_all(&tmp_path).await;
            return Err(GpudError::Fetch {
                model_id: model_id.to_string(),
                cause: FetchCause::Io("fetch produced no files".to_string()),
            });
        }

        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| fetch_io(model_id, &e))?;

        self.resolved
            .write()
            .await
            .insert(model_id.to_string(), final_path.clone());

        info!(model_id = model_id, path = %final_path.display(), "model cached");
        Ok(final_path)
    }
}

fn fetch_io(model_id: &str, err: &std::io::Error) -> GpudError {
    GpudError::Fetch {
        model_id: model_id.to_string(),
        cause: FetchCause::Io(err.to_string()),
    }
}

/// A model directory counts only when it exists and holds at least one entry.
fn dir_is_ready(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}

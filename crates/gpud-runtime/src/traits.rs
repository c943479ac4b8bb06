//! Container runtime trait definitions

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use gpud_core::GpudResult;

use crate::logs::LogSource;

/// Everything needed to create a worker container.
///
/// The adapter enforces the mount discipline: when `model_mount` is set the
/// directory is bound read-only at `/models` and `MODEL_PATH=/models` is
/// injected; the container only ever sees the single leased GPU.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub model_mount: Option<PathBuf>,
    pub gpu_id: u32,
    pub labels: HashMap<String, String>,
}

/// Runtime trait for managing worker containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create an ephemeral container, auto-removed on exit.
    async fn create_oneoff(&self, spec: &ContainerSpec) -> GpudResult<String>;

    /// Create a long-lived session container (not auto-removed).
    async fn create_long_lived(&self, spec: &ContainerSpec) -> GpudResult<String>;

    /// Run a command inside a running container; the returned source yields
    /// its output lines and blocks on `next_line`.
    async fn exec(&self, container_id: &str, argv: &[String]) -> GpudResult<Box<dyn LogSource>>;

    /// Follow a container's log output. The producer is synchronous; consume
    /// it through [`bridge_log_source`](crate::bridge_log_source).
    async fn stream_logs(&self, container_id: &str, follow: bool)
        -> GpudResult<Box<dyn LogSource>>;

    /// Stop a container gracefully; tolerant of already-gone containers.
    async fn stop(&self, container_id: &str, timeout: Duration) -> GpudResult<()>;

    /// Remove a container; tolerant of already-gone containers.
    async fn remove(&self, container_id: &str) -> GpudResult<()>;
}

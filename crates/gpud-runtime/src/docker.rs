//! Docker CLI runtime adapter
//!
//! Talks to the host docker daemon through the `docker` binary (DOOD: the
//! service runs with the docker socket mounted and creates sibling
//! containers). Creation and lifecycle calls run through `tokio::process`;
//! log and exec streams are spawned as blocking children and consumed via
//! [`ChildLogSource`](crate::logs::ChildLogSource).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use gpud_core::{GpudError, GpudResult};

use crate::logs::{ChildLogSource, LogSource};
use crate::traits::{ContainerRuntime, ContainerSpec};

/// Container path where the model directory is always mounted.
const MODEL_MOUNT_POINT: &str = "/models";

/// Docker-CLI-backed container runtime.
pub struct DockerCli {
    binary: PathBuf,
    memory_limit: String,
    cpu_quota: i64,
}

impl DockerCli {
    pub fn new(binary: PathBuf, memory_limit: String, cpu_quota: i64) -> Self {
        Self {
            binary,
            memory_limit,
            cpu_quota,
        }
    }

    /// Verify the daemon is reachable.
    pub async fn ping(&self) -> GpudResult<()> {
        let output = Command::new(&self.binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .await
            .map_err(|e| GpudError::RuntimeUnavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(GpudError::RuntimeUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        info!(
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "docker daemon reachable"
        );
        Ok(())
    }

    /// Shared `docker run` argument assembly.
    fn run_args(&self, spec: &ContainerSpec, auto_remove: bool, keep_stdin: bool) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];
        if auto_remove {
            args.push("--rm".to_string());
        }
        if keep_stdin {
            args.push("-i".to_string());
        }

        args.push("--name".to_string());
        args.push(spec.name.clone());

        args.push("--gpus".to_string());
        args.push(format!("device={}", spec.gpu_id));

        args.push("--memory".to_string());
        args.push(self.memory_limit.clone());
        args.push("--cpu-quota".to_string());
        args.push(self.cpu_quota.to_string());

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        if let Some(model_dir) = &spec.model_mount {
            args.push("-v".to_string());
            args.push(format!(
                "{}:{}:ro",
                model_dir.display(),
                MODEL_MOUNT_POINT
            ));
            args.push("-e".to_string());
            args.push(format!("MODEL_PATH={}", MODEL_MOUNT_POINT));
        }

        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    async fn run_container(&self, args: Vec<String>) -> GpudResult<String> {
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| GpudError::RuntimeUnavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(GpudError::Container(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(GpudError::Container(
                "docker run returned no container id".to_string(),
            ));
        }
        Ok(container_id)
    }

    /// Spawn a blocking docker subcommand whose output is a line stream.
    fn spawn_stream(&self, args: &[String]) -> GpudResult<Box<dyn LogSource>> {
        let child = std::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GpudError::RuntimeUnavailable(e.to_string()))?;

        Ok(Box::new(ChildLogSource::new(child)))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create_oneoff(&self, spec: &ContainerSpec) -> GpudResult<String> {
        info!(
            name = %spec.name,
            image = %spec.image,
            gpu = spec.gpu_id,
            "creating one-off container"
        );
        let container_id = self
            .run_container(self.run_args(spec, true, false))
            .await?;
        debug!(container_id = %short(&container_id), "one-off container created");
        Ok(container_id)
    }

    async fn create_long_lived(&self, spec: &ContainerSpec) -> GpudResult<String> {
        info!(
            name = %spec.name,
            image = %spec.image,
            gpu = spec.gpu_id,
            "creating session container"
        );
        let container_id = self
            .run_container(self.run_args(spec, false, true))
            .await?;
        debug!(container_id = %short(&container_id), "session container created");
        Ok(container_id)
    }

    async fn exec(&self, container_id: &str, argv: &[String]) -> GpudResult<Box<dyn LogSource>> {
        debug!(container_id = %short(container_id), argv = ?argv, "exec in container");
        let mut args = vec!["exec".to_string(), container_id.to_string()];
        args.extend(argv.iter().cloned());
        self.spawn_stream(&args)
    }

    async fn stream_logs(
        &self,
        container_id: &str,
        follow: bool,
    ) -> GpudResult<Box<dyn LogSource>> {
        let mut args = vec!["logs".to_string()];
        if follow {
            args.push("--follow".to_string());
        }
        args.push(container_id.to_string());
        self.spawn_stream(&args)
    }

    async fn stop(&self, container_id: &str, timeout: Duration) -> GpudResult<()> {
        let grace = timeout.as_secs().to_string();
        let output = Command::new(&self.binary)
            .args(["stop", "-t", grace.as_str(), container_id])
            .output()
            .await
            .map_err(|e| GpudError::RuntimeUnavailable(e.to_string()))?;

        if output.status.success() {
            info!(container_id = %short(container_id), "stopped container");
        } else {
            // Already stopped or auto-removed; nothing left to do.
            warn!(
                container_id = %short(container_id),
                error = %String::from_utf8_lossy(&output.stderr).trim(),
                "container stop failed"
            );
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> GpudResult<()> {
        let output = Command::new(&self.binary)
            .args(["rm", "-f", container_id])
            .output()
            .await
            .map_err(|e| GpudError::RuntimeUnavailable(e.to_string()))?;

        if output.status.success() {
            info!(container_id = %short(container_id), "removed container");
        } else {
            warn!(
                container_id = %short(container_id),
                error = %String::from_utf8_lossy(&output.stderr).trim(),
                "container remove failed"
            );
        }
        Ok(())
    }
}

fn short(container_id: &str) -> &str {
    &container_id[..container_id.len().min(12)]
}

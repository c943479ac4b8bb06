//! GPU telemetry providers
//!
//! Telemetry is best-effort: a failed sample degrades health snapshots but
//! never blocks allocation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use gpud_core::{GpudError, GpudResult, GpuMetrics};

use crate::gpu_allocator::GpuAllocator;

/// Metrics provider for the configured devices.
#[async_trait]
pub trait GpuTelemetry: Send + Sync {
    async fn sample(&self) -> GpudResult<Vec<GpuMetrics>>;
}

/// Telemetry via `nvidia-smi --query-gpu` CSV output.
pub struct NvidiaSmi {
    binary: PathBuf,
}

impl NvidiaSmi {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("nvidia-smi"),
        }
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GpuTelemetry for NvidiaSmi {
    async fn sample(&self) -> GpudResult<Vec<GpuMetrics>> {
        let output = Command::new(&self.binary)
            .args([
                "--query-gpu=index,memory.used,memory.total,temperature.gpu,utilization.gpu",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .await
            .map_err(|e| GpudError::Internal(format!("nvidia-smi failed: {}", e)))?;

        if !output.status.success() {
            return Err(GpudError::Internal(format!(
                "nvidia-smi exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_smi_csv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `index, memory.used, memory.total, temperature.gpu, utilization.gpu`
/// CSV rows; malformed rows are skipped.
fn parse_smi_csv(raw: &str) -> Vec<GpuMetrics> {
    raw.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != 5 {
                return None;
            }
            Some(GpuMetrics {
                device_id: fields[0].parse().ok()?,
                memory_used_mb: fields[1].parse().ok()?,
                memory_total_mb: fields[2].parse().ok()?,
                temperature_celsius: fields[3].parse().ok()?,
                utilization_percent: fields[4].parse().ok()?,
            })
        })
        .collect()
}

/// No-op provider for hosts without usable telemetry.
pub struct NoTelemetry;

#[async_trait]
impl GpuTelemetry for NoTelemetry {
    async fn sample(&self) -> GpudResult<Vec<GpuMetrics>> {
        Ok(Vec::new())
    }
}

/// Background loop feeding samples into the allocator.
pub async fn run_telemetry_loop(
    allocator: Arc<GpuAllocator>,
    telemetry: Arc<dyn GpuTelemetry>,
    interval: Duration,
) {
    info!(interval_seconds = interval.as_secs(), "starting GPU telemetry loop");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match telemetry.sample().await {
            Ok(samples) => {
                debug!(devices = samples.len(), "telemetry sample");
                allocator.record_metrics(samples);
            }
            Err(err) => {
                warn!(error = %err, "telemetry sample failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_smi_csv() {
        let metrics = parse_smi_csv("0, 1024, 24576, 55, 87\n1, 0, 24576, 31, 0\n");
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].device_id, 0);
        assert_eq!(metrics[0].memory_used_mb, 1024);
        assert_eq!(metrics[0].memory_total_mb, 24576);
        assert_eq!(metrics[0].temperature_celsius, 55.0);
        assert_eq!(metrics[1].utilization_percent, 0.0);
    }

    #[test]
    fn test_parse_smi_csv_skips_malformed_rows() {
        let metrics = parse_smi_csv("garbage\n0, 1, 2, 3, 4\n1, x, 2, 3, 4\n");
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].device_id, 0);
    }

    #[tokio::test]
    async fn test_no_telemetry_is_empty() {
        assert!(NoTelemetry.sample().await.unwrap().is_empty());
    }
}

//! GPU allocator for tracking and assigning devices by difficulty class

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use gpud_core::{Difficulty, GpuMetrics, GpudError, GpudResult, GpuStatus, Settings};

struct Slot {
    device_id: u32,
    difficulty: Difficulty,
    available: bool,
    owner: Option<Uuid>,
}

/// Tracks GPU leases.
///
/// `lease` and `release` mutate under one short mutex and never await, so
/// the availability view is always consistent. Telemetry lives in a separate
/// lock and may lag; a snapshot can carry stale metrics but never a stale
/// `is_available` flag.
pub struct GpuAllocator {
    slots: Mutex<Vec<Slot>>,
    metrics: RwLock<HashMap<u32, GpuMetrics>>,
}

impl GpuAllocator {
    /// Build the fixed device list from settings, ordered by ascending id.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut ids = settings.gpu_device_ids.clone();
        ids.sort_unstable();
        ids.dedup();

        let slots: Vec<Slot> = ids
            .into_iter()
            .map(|device_id| Slot {
                device_id,
                difficulty: settings.difficulty_for(device_id),
                available: true,
                owner: None,
            })
            .collect();

        info!(devices = slots.len(), "GPU allocator initialized");

        Self {
            slots: Mutex::new(slots),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Lease the first available device of the given class.
    pub fn lease(&self, difficulty: Difficulty, owner: Uuid) -> GpudResult<u32> {
        let mut slots = self.slots.lock().expect("allocator lock poisoned");

        for slot in slots.iter_mut() {
            if slot.difficulty == difficulty && slot.available {
                slot.available = false;
                slot.owner = Some(owner);
                info!(
                    gpu = slot.device_id,
                    difficulty = %difficulty,
                    owner = %owner,
                    "leased GPU"
                );
                return Ok(slot.device_id);
            }
        }

        warn!(difficulty = %difficulty, "no available GPU");
        Err(GpudError::CapacityFull { difficulty })
    }

    /// Lease with an RAII guard; dropping the guard releases the device
    /// unless ownership was transferred with [`GpuLease::disarm`].
    pub fn lease_guarded(
        self: &Arc<Self>,
        difficulty: Difficulty,
        owner: Uuid,
    ) -> GpudResult<GpuLease> {
        let gpu_id = self.lease(difficulty, owner)?;
        Ok(GpuLease {
            allocator: Arc::clone(self),
            gpu_id,
            armed: true,
        })
    }

    /// Mark a device available again; unknown or already-free ids are no-ops.
    pub fn release(&self, gpu_id: u32) {
        let mut slots = self.slots.lock().expect("allocator lock poisoned");
        match slots.iter_mut().find(|s| s.device_id == gpu_id) {
            Some(slot) => {
                if !slot.available {
                    slot.available = true;
                    slot.owner = None;
                    debug!(gpu = gpu_id, "released GPU");
                }
            }
            None => warn!(gpu = gpu_id, "attempted to release unknown GPU"),
        }
    }

    /// Number of currently leased devices.
    pub fn leased_count(&self) -> usize {
        let slots = self.slots.lock().expect("allocator lock poisoned");
        slots.iter().filter(|s| !s.available).count()
    }

    /// Read-only view for health reporting.
    pub fn snapshot(&self) -> Vec<GpuStatus> {
        let metrics = self.metrics.read().expect("metrics lock poisoned");
        let slots = self.slots.lock().expect("allocator lock poisoned");

        slots
            .iter()
            .map(|slot| {
                let sample = metrics.get(&slot.device_id);
                GpuStatus {
                    device_id: slot.device_id,
                    difficulty: slot.difficulty,
                    is_available: slot.available,
                    memory_used_mb: sample.map(|m| m.memory_used_mb).unwrap_or(0),
                    memory_total_mb: sample.map(|m| m.memory_total_mb).unwrap_or(0),
                    temperature_celsius: sample.map(|m| m.temperature_celsius).unwrap_or(0.0),
                    utilization_percent: sample.map(|m| m.utilization_percent).unwrap_or(0.0),
                    current_owner: slot.owner,
                }
            })
            .collect()
    }

    /// Fold in a telemetry sample. Samples for unknown devices are ignored.
    pub fn record_metrics(&self, samples: Vec<GpuMetrics>) {
        let known: Vec<u32> = {
            let slots = self.slots.lock().expect("allocator lock poisoned");
            slots.iter().map(|s| s.device_id).collect()
        };

        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        for sample in samples {
            if known.contains(&sample.device_id) {
                metrics.insert(sample.device_id, sample);
            }
        }
    }
}

/// RAII lease: releases the device on drop unless disarmed.
pub struct GpuLease {
    allocator: Arc<GpuAllocator>,
    pub gpu_id: u32,
    armed: bool,
}

impl GpuLease {
    /// Transfer ownership of the device (e.g. to a session); the guard no
    /// longer releases on drop.
    pub fn disarm(mut self) -> u32 {
        self.armed = false;
        self.gpu_id
    }
}

impl Drop for GpuLease {
    fn drop(&mut self) {
        if self.armed {
            self.allocator.release(self.gpu_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(pairs: &[(u32, Difficulty)]) -> Arc<GpuAllocator> {
        let settings = Settings {
            gpu_device_ids: pairs.iter().map(|(id, _)| *id).collect(),
            gpu_device_difficulty: pairs.iter().copied().collect(),
            ..Settings::default()
        };
        Arc::new(GpuAllocator::from_settings(&settings))
    }

    #[test]
    fn test_lease_filters_by_difficulty() {
        let alloc = allocator(&[(0, Difficulty::Low), (1, Difficulty::High)]);

        let gpu = alloc.lease(Difficulty::High, Uuid::new_v4()).unwrap();
        assert_eq!(gpu, 1);

        // The low device is still free, but high is exhausted.
        let err = alloc.lease(Difficulty::High, Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err,
            GpudError::CapacityFull {
                difficulty: Difficulty::High
            }
        ));
        assert_eq!(alloc.lease(Difficulty::Low, Uuid::new_v4()).unwrap(), 0);
    }

    #[test]
    fn test_lease_ties_break_by_ascending_id() {
        let alloc = allocator(&[(2, Difficulty::Low), (0, Difficulty::Low), (1, Difficulty::Low)]);
        assert_eq!(alloc.lease(Difficulty::Low, Uuid::new_v4()).unwrap(), 0);
        assert_eq!(alloc.lease(Difficulty::Low, Uuid::new_v4()).unwrap(), 1);
        assert_eq!(alloc.lease(Difficulty::Low, Uuid::new_v4()).unwrap(), 2);
    }

    #[test]
    fn test_release_round_trip_restores_state() {
        let alloc = allocator(&[(0, Difficulty::Low)]);
        let before = alloc.snapshot();

        let gpu = alloc.lease(Difficulty::Low, Uuid::new_v4()).unwrap();
        alloc.release(gpu);

        let after = alloc.snapshot();
        assert_eq!(before[0].is_available, after[0].is_available);
        assert_eq!(alloc.leased_count(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let alloc = allocator(&[(0, Difficulty::Low)]);
        let gpu = alloc.lease(Difficulty::Low, Uuid::new_v4()).unwrap();
        alloc.release(gpu);
        alloc.release(gpu);
        alloc.release(42);
        assert_eq!(alloc.leased_count(), 0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let alloc = allocator(&[(0, Difficulty::Low)]);
        {
            let _lease = alloc.lease_guarded(Difficulty::Low, Uuid::new_v4()).unwrap();
            assert_eq!(alloc.leased_count(), 1);
        }
        assert_eq!(alloc.leased_count(), 0);
    }

    #[test]
    fn test_disarmed_guard_keeps_lease() {
        let alloc = allocator(&[(0, Difficulty::Low)]);
        let lease = alloc.lease_guarded(Difficulty::Low, Uuid::new_v4()).unwrap();
        let gpu_id = lease.disarm();
        assert_eq!(alloc.leased_count(), 1);
        alloc.release(gpu_id);
        assert_eq!(alloc.leased_count(), 0);
    }

    #[test]
    fn test_snapshot_merges_metrics() {
        let alloc = allocator(&[(0, Difficulty::Low)]);
        alloc.record_metrics(vec![
            GpuMetrics {
                device_id: 0,
                memory_used_mb: 1024,
                memory_total_mb: 8192,
                temperature_celsius: 61.0,
                utilization_percent: 87.0,
            },
            // Unknown device: ignored.
            GpuMetrics {
                device_id: 9,
                ..GpuMetrics::default()
            },
        ]);

        let snapshot = alloc.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].memory_used_mb, 1024);
        assert_eq!(snapshot[0].utilization_percent, 87.0);
    }
}

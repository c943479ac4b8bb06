//! GPU allocation and session lifecycle for gpud
//!
//! - [`GpuAllocator`]: difficulty-filtered GPU leases
//! - [`GpuTelemetry`]: pluggable metrics sampling
//! - [`SessionRegistry`]: long-lived session containers with bounded
//!   per-session request queues and one dispatcher task each
//! - [`TimeoutReaper`]: idle and max-lifetime enforcement
//! - [`ActiveTasks`]: in-flight request tracking for health reporting

mod dispatcher;
mod gpu_allocator;
mod reaper;
mod registry;
mod telemetry;
mod tracker;

pub use gpu_allocator::{GpuAllocator, GpuLease};
pub use reaper::TimeoutReaper;
pub use registry::{QueuedRequest, Session, SessionLimits, SessionRegistry};
pub use telemetry::{run_telemetry_loop, GpuTelemetry, NoTelemetry, NvidiaSmi};
pub use tracker::ActiveTasks;

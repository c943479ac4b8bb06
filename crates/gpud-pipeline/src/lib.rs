//! Task request pipeline for gpud
//!
//! Per-request orchestration: resolve the task against the catalog, ensure
//! the model is on disk, route to a GPU (one-off) or a session, and stream
//! the execution events back to the caller.

mod handler;

pub use gpud_scheduler::ActiveTasks;
pub use handler::TaskPipeline;

//! Model storage for gpud
//!
//! Materializes model directories on the host filesystem, fetching them from
//! the file service on demand with per-model single-flight coordination.

mod cache;
mod fetch;

pub use cache::ModelCache;
pub use fetch::{FileServiceFetcher, ModelFetcher};

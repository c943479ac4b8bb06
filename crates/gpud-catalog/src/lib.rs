//! Task catalog resolution
//!
//! The catalog is three independently keyed YAML documents:
//! `task_definitions.yaml` (by task name), `task_actions.yaml` (by model id)
//! and `model_paths.yaml` (by model id, optional).

mod catalog;

pub use catalog::ConfigCatalog;

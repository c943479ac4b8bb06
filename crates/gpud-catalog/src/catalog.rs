//! Catalog loading and task resolution

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use gpud_core::{
    GpudError, GpudResult, ModelPath, ResolvedTask, TaskAction, TaskDefinition, TaskOverrides,
};

const TASK_DEFINITIONS_FILE: &str = "task_definitions.yaml";
const TASK_ACTIONS_FILE: &str = "task_actions.yaml";
const MODEL_PATHS_FILE: &str = "model_paths.yaml";

/// Resolves task names against the three catalog documents.
///
/// The documents are re-read on every resolve, so edits to the catalog take
/// effect on the next request without a restart. A `ResolvedTask` is
/// self-contained; nothing downstream goes back to the files.
pub struct ConfigCatalog {
    dir: PathBuf,
    default_timeout: u64,
    max_timeout: u64,
}

impl ConfigCatalog {
    pub fn new(dir: impl Into<PathBuf>, default_timeout: u64, max_timeout: u64) -> Self {
        Self {
            dir: dir.into(),
            default_timeout,
            max_timeout,
        }
    }

    /// Resolve a task name, applying request overrides field by field.
    ///
    /// Lookup order: `task_definitions[name]` → `model_id` →
    /// `task_actions[model_id]` → `model_paths[model_id]?`. Only the last
    /// lookup may miss without an error.
    pub fn resolve(&self, task_name: &str, overrides: &TaskOverrides) -> GpudResult<ResolvedTask> {
        let definitions: HashMap<String, TaskDefinition> =
            self.load_document(TASK_DEFINITIONS_FILE);

        let definition = definitions
            .get(task_name)
            .ok_or_else(|| GpudError::UnknownTask(task_name.to_string()))?;

        let actions: HashMap<String, TaskAction> = self.load_document(TASK_ACTIONS_FILE);
        let action = actions
            .get(&definition.model_id)
            .ok_or_else(|| GpudError::MissingAction(definition.model_id.clone()))?;

        let model_paths: HashMap<String, ModelPath> = self.load_document(MODEL_PATHS_FILE);
        let model_path = model_paths.get(&definition.model_id).cloned();

        let difficulty = overrides
            .task_difficulty
            .unwrap_or(definition.task_difficulty);

        let timeout_seconds = overrides
            .timeout_seconds
            .or(definition.timeout_seconds)
            .unwrap_or(self.default_timeout)
            .clamp(1, self.max_timeout);

        // Request metadata wins over definition defaults, key by key.
        let mut metadata = definition.metadata.clone();
        for (key, value) in &overrides.metadata {
            metadata.insert(key.clone(), value.clone());
        }

        debug!(
            task_name = task_name,
            task_type = %definition.task_type,
            difficulty = %difficulty,
            model_id = %definition.model_id,
            timeout_seconds = timeout_seconds,
            "resolved task"
        );

        Ok(ResolvedTask {
            task_name: task_name.to_string(),
            kind: definition.task_type,
            difficulty,
            timeout: Duration::from_secs(timeout_seconds),
            metadata,
            model_id: definition.model_id.clone(),
            action: action.clone(),
            model_path,
            session_id: overrides.session_id,
            create_session: overrides.create_session,
        })
    }

    /// Load one document; a missing or unparseable file reads as empty so
    /// the miss surfaces as `UnknownTask`/`MissingAction` on lookup.
    fn load_document<T: DeserializeOwned>(&self, filename: &str) -> HashMap<String, T> {
        let path = self.dir.join(filename);
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to parse catalog document");
                    HashMap::new()
                }
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read catalog document");
                HashMap::new()
            }
        }
    }
}

impl std::fmt::Debug for ConfigCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCatalog")
            .field("dir", &self.dir)
            .finish()
    }
}

//! Task catalog and request types

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::gpu::Difficulty;

/// How a task executes: in a fresh ephemeral container, or through a
/// long-lived session container that keeps the model resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Oneoff,
    Session,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Oneoff => write!(f, "oneoff"),
            TaskKind::Session => write!(f, "session"),
        }
    }
}

/// Pre-defined task template, one entry of `task_definitions.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub description: String,
    pub task_type: TaskKind,
    pub task_difficulty: Difficulty,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Keys the `task_actions` lookup and (optionally) `model_paths`
    pub model_id: String,
}

/// Worker execution configuration, one entry of `task_actions.yaml`,
/// keyed by model id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAction {
    pub docker_image: String,
    pub command: Vec<String>,
    /// Argv used for per-request `exec` against a session container;
    /// defaults to `command` when absent
    #[serde(default)]
    pub exec_command: Vec<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub build_args: HashMap<String, String>,
}

impl TaskAction {
    /// Argv for session dispatch.
    pub fn exec_argv(&self) -> &[String] {
        if self.exec_command.is_empty() {
            &self.command
        } else {
            &self.exec_command
        }
    }
}

/// Host location of a model directory, one entry of `model_paths.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPath {
    pub path: PathBuf,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size_gb: f64,
}

/// Per-request overrides applied on top of a task definition.
#[derive(Debug, Clone, Default)]
pub struct TaskOverrides {
    pub task_difficulty: Option<Difficulty>,
    pub timeout_seconds: Option<u64>,
    pub metadata: Map<String, Value>,
    pub session_id: Option<Uuid>,
    pub create_session: bool,
}

/// Fully resolved task: catalog entries merged with request overrides.
/// Self-contained; the pipeline never goes back to the catalog.
#[derive(Debug, Clone)]
pub struct ResolvedTask {
    pub task_name: String,
    pub kind: TaskKind,
    pub difficulty: Difficulty,
    pub timeout: Duration,
    pub metadata: Map<String, Value>,
    pub model_id: String,
    pub action: TaskAction,
    pub model_path: Option<ModelPath>,
    pub session_id: Option<Uuid>,
    pub create_session: bool,
}

impl ResolvedTask {
    /// Environment for the worker container: the action's `env_vars` plus
    /// the resolved metadata projected as `METADATA_<KEY>` entries.
    pub fn worker_env(&self) -> HashMap<String, String> {
        let mut env = self.action.env_vars.clone();
        for (key, value) in &self.metadata {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            env.insert(format!("METADATA_{}", key.to_uppercase()), value);
        }
        env
    }
}

/// Body of `POST /api/tasks/predefined`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSubmission {
    pub task_name: String,
    #[serde(default)]
    pub task_difficulty: Option<Difficulty>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub create_session: bool,
}

impl TaskSubmission {
    pub fn overrides(&self) -> TaskOverrides {
        TaskOverrides {
            task_difficulty: self.task_difficulty,
            timeout_seconds: self.timeout_seconds,
            metadata: self.metadata.clone(),
            session_id: self.session_id,
            create_session: self.create_session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_argv_falls_back_to_command() {
        let action = TaskAction {
            docker_image: "loading-worker".to_string(),
            command: vec!["python".to_string(), "worker.py".to_string()],
            exec_command: vec![],
            env_vars: HashMap::new(),
            build_args: HashMap::new(),
        };
        assert_eq!(action.exec_argv(), action.command.as_slice());

        let action = TaskAction {
            exec_command: vec!["run-task".to_string()],
            ..action
        };
        assert_eq!(action.exec_argv(), &["run-task".to_string()]);
    }

    #[test]
    fn test_submission_deserialize_defaults() {
        let submission: TaskSubmission =
            serde_json::from_str(r#"{"task_name":"loading-test"}"#).unwrap();
        assert_eq!(submission.task_name, "loading-test");
        assert!(submission.task_difficulty.is_none());
        assert!(submission.metadata.is_empty());
        assert!(!submission.create_session);
    }

    #[test]
    fn test_submission_rejects_bad_difficulty() {
        let result = serde_json::from_str::<TaskSubmission>(
            r#"{"task_name":"x","task_difficulty":"medium"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_worker_env_projects_metadata() {
        let mut metadata = Map::new();
        metadata.insert("batch_size".to_string(), serde_json::json!(4));
        metadata.insert("prompt".to_string(), serde_json::json!("hello"));

        let resolved = ResolvedTask {
            task_name: "loading-test".to_string(),
            kind: TaskKind::Oneoff,
            difficulty: Difficulty::Low,
            timeout: Duration::from_secs(60),
            metadata,
            model_id: "test-loading".to_string(),
            action: TaskAction {
                docker_image: "loading-worker".to_string(),
                command: vec!["python".to_string()],
                exec_command: vec![],
                env_vars: HashMap::from([("LOG_FORMAT".to_string(), "json".to_string())]),
                build_args: HashMap::new(),
            },
            model_path: None,
            session_id: None,
            create_session: false,
        };

        let env = resolved.worker_env();
        assert_eq!(env["LOG_FORMAT"], "json");
        assert_eq!(env["METADATA_BATCH_SIZE"], "4");
        assert_eq!(env["METADATA_PROMPT"], "hello");
    }

    #[test]
    fn test_task_kind_serde() {
        let kind: TaskKind = serde_json::from_str("\"session\"").unwrap();
        assert_eq!(kind, TaskKind::Session);
        assert_eq!(kind.to_string(), "session");
    }
}

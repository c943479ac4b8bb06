//! Session status and API-facing session snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifecycle status.
///
/// ```text
/// INITIALIZING --container ready--> WAITING
/// WAITING      --request dequeued--> WORKING
/// WORKING      --request complete--> WAITING
/// *            --kill-------------> KILLED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Container starting, model loading
    Initializing,
    /// Idle, ready for requests
    Waiting,
    /// Processing a request
    Working,
    /// Terminated
    Killed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Killed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Initializing => write!(f, "initializing"),
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Working => write!(f, "working"),
            SessionStatus::Killed => write!(f, "killed"),
        }
    }
}

/// Read-only session snapshot served by the sessions endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub gpu_device_id: u32,
    pub container_id: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Number of requests currently queued
    pub queue_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_state() {
        assert!(SessionStatus::Killed.is_terminal());
        assert!(!SessionStatus::Waiting.is_terminal());
        assert!(!SessionStatus::Initializing.is_terminal());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&SessionStatus::Waiting).unwrap();
        assert_eq!(json, "\"waiting\"");
    }
}

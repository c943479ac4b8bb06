//! Error types for gpud

use thiserror::Error;
use uuid::Uuid;

use crate::gpu::Difficulty;
use crate::session::SessionStatus;

/// Main error type for gpud
#[derive(Error, Debug)]
pub enum GpudError {
    /// Task name has no entry in the catalog
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Task resolved to a model id with no action entry
    #[error("no task action configured for model: {0}")]
    MissingAction(String),

    /// Difficulty tag outside {low, high}
    #[error("invalid difficulty: {0}")]
    InvalidDifficulty(String),

    /// Missing or wrong API key
    #[error("invalid or missing API key")]
    Unauthenticated,

    /// Session id not present in the registry
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Session exists but cannot accept requests in its current state
    #[error("session {session_id} is {status}, cannot accept requests")]
    InvalidSessionState {
        session_id: Uuid,
        status: SessionStatus,
    },

    /// No available GPU in the requested difficulty class
    #[error("no available GPU with difficulty={difficulty}")]
    CapacityFull { difficulty: Difficulty },

    /// Session request queue is at capacity
    #[error("session {0} queue is full")]
    QueueFull(Uuid),

    /// Model could not be materialized on the host
    #[error("model fetch failed for {model_id}: {cause}")]
    Fetch { model_id: String, cause: FetchCause },

    /// Container runtime returned an error
    #[error("container runtime error: {0}")]
    Container(String),

    /// Container runtime could not be reached at all
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Resolved docker image is outside the allow-list
    #[error("docker image not allowed: {0}")]
    ImageNotAllowed(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for gpud operations
pub type GpudResult<T> = Result<T, GpudError>;

impl From<serde_json::Error> for GpudError {
    fn from(err: serde_json::Error) -> Self {
        GpudError::Serialization(err.to_string())
    }
}

/// Why a model fetch failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCause {
    /// Model not on disk and auto-fetch is disabled
    NotCached,
    /// Transport-level failure or non-success response
    Network(String),
    /// File service rejected the internal key
    Unauthorized,
    /// Downloaded payload did not match the expected checksum
    Checksum,
    /// Local filesystem failure while materializing the model
    Io(String),
}

impl std::fmt::Display for FetchCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchCause::NotCached => write!(f, "not cached and auto-fetch disabled"),
            FetchCause::Network(msg) => write!(f, "network error: {}", msg),
            FetchCause::Unauthorized => write!(f, "file service rejected internal key"),
            FetchCause::Checksum => write!(f, "checksum mismatch"),
            FetchCause::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GpudError::UnknownTask("loading-test".to_string());
        assert_eq!(err.to_string(), "unknown task: loading-test");

        let err = GpudError::CapacityFull {
            difficulty: Difficulty::Low,
        };
        assert_eq!(err.to_string(), "no available GPU with difficulty=low");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GpudError = io_err.into();
        assert!(matches!(err, GpudError::Io(_)));
    }

    #[test]
    fn test_fetch_cause_display() {
        let err = GpudError::Fetch {
            model_id: "llama-7b".to_string(),
            cause: FetchCause::NotCached,
        };
        assert_eq!(
            err.to_string(),
            "model fetch failed for llama-7b: not cached and auto-fetch disabled"
        );
    }
}

//! Streaming event model
//!
//! Workers emit one JSON object per stdout line with a string `event`
//! discriminator and arbitrary sibling fields. Lines that do not parse as a
//! known frame degrade to `logs` events instead of being dropped.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of GPU/session placement for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// A fresh GPU lease (and, for sessions, a fresh container)
    Allocated,
    /// An existing waiting session was reused
    SessionFound,
    /// No GPU available in the requested class
    Full,
    /// The target session queue was at capacity
    QueueFull,
    /// The requested session id does not exist
    SessionNotFound,
    /// Placement succeeded but a later step failed in-band
    Failed,
}

/// Terminal status carried by the closing `task_finish` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishStatus {
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

/// Severity tag for pass-through log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
}

/// One event in a task's stream.
///
/// The wire representation is an internally tagged JSON object; the tag also
/// names the SSE event block. Workers may emit the short `finish` tag for the
/// terminal event, which maps to `task_finish` on the way out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Connection {
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        gpu_id: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Worker {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        container_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TextDelta {
        delta: String,
    },
    Text {
        content: String,
    },
    Logs {
        log: String,
        #[serde(default)]
        level: LogLevel,
    },
    #[serde(rename = "task_finish", alias = "finish")]
    TaskFinish {
        status: FinishStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_seconds: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Event {
    pub fn connection(
        status: ConnectionStatus,
        gpu_id: Option<u32>,
        session_id: Option<Uuid>,
    ) -> Self {
        Event::Connection {
            status,
            gpu_id,
            session_id,
            message: None,
        }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Event::Connection {
            status: ConnectionStatus::Failed,
            gpu_id: None,
            session_id: None,
            message: Some(message.into()),
        }
    }

    pub fn worker_created(container_id: impl Into<String>) -> Self {
        Event::Worker {
            status: "created".to_string(),
            container_id: Some(container_id.into()),
            error: None,
        }
    }

    pub fn logs(line: impl Into<String>, level: LogLevel) -> Self {
        Event::Logs {
            log: line.into(),
            level,
        }
    }

    pub fn task_finish(
        status: FinishStatus,
        elapsed_seconds: Option<u64>,
        error: Option<String>,
    ) -> Self {
        Event::TaskFinish {
            status,
            elapsed_seconds,
            error,
        }
    }

    /// SSE event name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connection { .. } => "connection",
            Event::Worker { .. } => "worker",
            Event::TextDelta { .. } => "text_delta",
            Event::Text { .. } => "text",
            Event::Logs { .. } => "logs",
            Event::TaskFinish { .. } => "task_finish",
        }
    }

    /// Payload for the SSE `data:` line, without the discriminator.
    pub fn payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("event");
        }
        value
    }

    /// Parse one raw worker log line into an event.
    ///
    /// Empty lines yield `None`. Lines that are not a well-formed frame
    /// (not JSON, no recognized tag, or wrong field shapes) degrade to a
    /// `logs` event at the given level.
    pub fn parse_log_line(line: &str, fallback_level: LogLevel) -> Option<Event> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        match serde_json::from_str::<Event>(line) {
            Ok(event) => Some(event),
            Err(_) => Some(Event::logs(line, fallback_level)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_frame() {
        let event = Event::parse_log_line(r#"{"event":"text_delta","delta":"hel"}"#, LogLevel::Info)
            .unwrap();
        assert_eq!(
            event,
            Event::TextDelta {
                delta: "hel".to_string()
            }
        );
    }

    #[test]
    fn test_parse_finish_alias() {
        let event = Event::parse_log_line(
            r#"{"event":"finish","status":"completed","elapsed_seconds":3}"#,
            LogLevel::Info,
        )
        .unwrap();
        assert_eq!(
            event,
            Event::TaskFinish {
                status: FinishStatus::Completed,
                elapsed_seconds: Some(3),
                error: None,
            }
        );
    }

    #[test]
    fn test_parse_tolerates_extra_fields() {
        let event = Event::parse_log_line(
            r#"{"event":"text","content":"done","model":"llama-7b"}"#,
            LogLevel::Info,
        )
        .unwrap();
        assert_eq!(
            event,
            Event::Text {
                content: "done".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_tag_degrades_to_logs() {
        let raw = r#"{"event":"progress","pct":40}"#;
        let event = Event::parse_log_line(raw, LogLevel::Info).unwrap();
        assert_eq!(event, Event::logs(raw, LogLevel::Info));
    }

    #[test]
    fn test_plain_line_degrades_to_logs() {
        let event = Event::parse_log_line("loading checkpoint shard 2/4", LogLevel::Warning)
            .unwrap();
        assert_eq!(
            event,
            Event::logs("loading checkpoint shard 2/4", LogLevel::Warning)
        );
    }

    #[test]
    fn test_empty_line_skipped() {
        assert!(Event::parse_log_line("", LogLevel::Info).is_none());
        assert!(Event::parse_log_line("   \n", LogLevel::Info).is_none());
    }

    #[test]
    fn test_sse_parts() {
        let event = Event::connection(ConnectionStatus::Allocated, Some(0), None);
        assert_eq!(event.name(), "connection");
        let payload = event.payload();
        assert_eq!(payload["status"], "allocated");
        assert_eq!(payload["gpu_id"], 0);
        assert!(payload.get("event").is_none());
        assert!(payload.get("session_id").is_none());
    }

    #[test]
    fn test_task_finish_wire_tag() {
        let event = Event::task_finish(FinishStatus::Timeout, Some(2), None);
        assert_eq!(event.name(), "task_finish");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_finish");
        assert_eq!(json["status"], "timeout");
    }

    #[test]
    fn test_logs_level_defaults_to_info() {
        let event =
            Event::parse_log_line(r#"{"event":"logs","log":"warmup done"}"#, LogLevel::Warning)
                .unwrap();
        assert_eq!(
            event,
            Event::Logs {
                log: "warmup done".to_string(),
                level: LogLevel::Info,
            }
        );
    }
}

//! CLI commands implementation

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("X-API-Key", &self.api_key)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("X-API-Key", &self.api_key)
    }

    fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .delete(self.url(path))
            .header("X-API-Key", &self.api_key)
    }
}

/// Session response from the API
#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub status: String,
    pub gpu_device_id: u32,
    pub container_id: String,
    pub model_id: String,
    pub created_at: String,
    pub last_activity: String,
    pub queue_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct GpuStatusResponse {
    pub device_id: u32,
    pub difficulty: String,
    pub is_available: bool,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub utilization_percent: f32,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub gpus: Vec<GpuStatusResponse>,
    pub sessions: usize,
    pub tasks: usize,
}

/// Submit a pre-defined task and print its event stream
pub async fn run(
    client: &ApiClient,
    task_name: String,
    difficulty: Option<String>,
    timeout: Option<u64>,
    session: Option<Uuid>,
    create_session: bool,
    metadata: Vec<String>,
) -> Result<()> {
    let mut body = json!({ "task_name": task_name });
    if let Some(difficulty) = difficulty {
        body["task_difficulty"] = json!(difficulty);
    }
    if let Some(timeout) = timeout {
        body["timeout_seconds"] = json!(timeout);
    }
    if let Some(session) = session {
        body["session_id"] = json!(session);
    }
    if create_session {
        body["create_session"] = json!(true);
    }
    if !metadata.is_empty() {
        let mut map = serde_json::Map::new();
        for entry in metadata {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("invalid metadata entry: {}", entry))?;
            map.insert(key.to_string(), json!(value));
        }
        body["metadata"] = serde_json::Value::Object(map);
    }

    let response = client
        .post("/api/tasks/predefined")
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error = response.text().await?;
        eprintln!("Task submission failed ({}): {}", status, error);
        return Ok(());
    }

    stream_events(response).await
}

/// Read an SSE response, printing one line per event
async fn stream_events(mut response: reqwest::Response) -> Result<()> {
    let mut parser = SseParser::default();

    while let Some(chunk) = response.chunk().await? {
        for frame in parser.push(&chunk) {
            print_event(&frame);
        }
    }

    Ok(())
}

/// One parsed SSE frame
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental SSE frame parser over raw response chunks
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Feed bytes, returning every completed frame
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..boundary + 2).collect();
            let mut event = String::new();
            let mut data = String::new();
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = rest.trim().to_string();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = rest.trim().to_string();
                }
            }
            if !event.is_empty() || !data.is_empty() {
                frames.push(SseFrame { event, data });
            }
        }
        frames
    }
}

fn print_event(frame: &SseFrame) {
    match frame.event.as_str() {
        "text_delta" => {
            // Inline streaming output, no newline per delta.
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&frame.data) {
                if let Some(delta) = value["delta"].as_str() {
                    print!("{}", delta);
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                    return;
                }
            }
            println!("{}", frame.data);
        }
        "task_finish" => {
            println!();
            println!("[{}] {}", frame.event, frame.data);
        }
        _ => {
            println!("[{}] {}", frame.event, frame.data);
        }
    }
}

/// List active sessions
pub async fn sessions(client: &ApiClient) -> Result<()> {
    let response = client.get("/api/sessions").send().await?;

    if response.status().is_success() {
        let list: SessionListResponse = response.json().await?;
        if list.sessions.is_empty() {
            println!("No active sessions");
        } else {
            println!(
                "{:<36} {:<12} {:<6} {:<20} {:<6}",
                "SESSION", "STATUS", "GPU", "MODEL", "QUEUE"
            );
            println!("{}", "-".repeat(84));
            for s in list.sessions {
                println!(
                    "{:<36} {:<12} {:<6} {:<20} {:<6}",
                    s.session_id, s.status, s.gpu_device_id, s.model_id, s.queue_size
                );
            }
            println!("{} total", list.total);
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to list sessions: {}", error);
    }

    Ok(())
}

/// Show one session
pub async fn session(client: &ApiClient, id: Uuid) -> Result<()> {
    let response = client.get(&format!("/api/sessions/{}", id)).send().await?;

    if response.status().is_success() {
        let s: SessionResponse = response.json().await?;
        println!("Session: {}", s.session_id);
        println!("  Status: {}", s.status);
        println!("  GPU: {}", s.gpu_device_id);
        println!("  Model: {}", s.model_id);
        println!("  Container: {}", &s.container_id[..s.container_id.len().min(12)]);
        println!("  Created: {}", s.created_at);
        println!("  Last activity: {}", s.last_activity);
        println!("  Queued requests: {}", s.queue_size);
    } else {
        let error = response.text().await?;
        eprintln!("Session not found: {}", error);
    }

    Ok(())
}

/// Kill a session
pub async fn kill(client: &ApiClient, id: Uuid) -> Result<()> {
    let response = client
        .delete(&format!("/api/sessions/{}", id))
        .send()
        .await?;

    if response.status().is_success() {
        println!("Session {} killed", id);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to kill session: {}", error);
    }

    Ok(())
}

/// Reset a session's idle timeout
pub async fn keepalive(client: &ApiClient, id: Uuid) -> Result<()> {
    let response = client
        .post(&format!("/api/sessions/{}/keepalive", id))
        .send()
        .await?;

    if response.status().is_success() {
        println!("Session {} keepalive updated", id);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to update keepalive: {}", error);
    }

    Ok(())
}

/// Show service health
pub async fn health(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/health")).send().await?;

    if response.status().is_success() {
        let health: HealthResponse = response.json().await?;
        println!("Status: {}", health.status);
        println!("Sessions: {}", health.sessions);
        println!("Tasks in flight: {}", health.tasks);
        println!();
        for gpu in health.gpus {
            println!(
                "[{}] {} - {}/{}MB - {:.0}% - {}",
                gpu.device_id,
                gpu.difficulty,
                gpu.memory_used_mb,
                gpu.memory_total_mb,
                gpu.utilization_percent,
                if gpu.is_available { "Available" } else { "In Use" }
            );
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get health: {}", error);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_parser_reassembles_split_frames() {
        let mut parser = SseParser::default();

        let frames = parser.push(b"event: connection\ndata: {\"status\":");
        assert!(frames.is_empty());

        let frames = parser.push(b"\"allocated\"}\n\nevent: worker\ndata: {}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "connection");
        assert_eq!(frames[0].data, "{\"status\":\"allocated\"}");
        assert_eq!(frames[1].event, "worker");
    }

    #[test]
    fn test_sse_parser_ignores_keepalive_comments() {
        let mut parser = SseParser::default();
        let frames = parser.push(b":keep-alive\n\nevent: logs\ndata: {\"log\":\"x\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "logs");
    }

    #[test]
    fn test_api_client_url() {
        let client = ApiClient::new("http://localhost:8200/", "k");
        assert_eq!(
            client.url("/api/sessions"),
            "http://localhost:8200/api/sessions"
        );
    }
}

//! REST API handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;
use uuid::Uuid;

use gpud_core::{Event, GpudError, GpuStatus, SessionInfo, TaskSubmission};
use gpud_pipeline::{ActiveTasks, TaskPipeline};
use gpud_scheduler::{GpuAllocator, SessionRegistry};

use crate::auth::require_api_key;
use crate::error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TaskPipeline>,
    pub registry: Arc<SessionRegistry>,
    pub allocator: Arc<GpuAllocator>,
    pub tracker: Arc<ActiveTasks>,
    pub api_key: String,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/tasks/predefined", post(run_predefined_task))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", get(get_session).delete(kill_session))
        .route("/api/sessions/:id/keepalive", post(keepalive_session))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(api)
        .route("/health", get(health))
        .with_state(state)
}

/// Execute a pre-defined task, streaming framed events over SSE.
///
/// Placement errors surface as HTTP statuses before the stream opens; the
/// terminal status of an opened stream arrives in-band as `task_finish`.
async fn run_predefined_task(
    State(state): State<AppState>,
    payload: Result<Json<TaskSubmission>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    // Malformed bodies (e.g. an unknown difficulty tag) are a 400, not 422.
    let Json(submission) =
        payload.map_err(|rejection| GpudError::Serialization(rejection.body_text()))?;

    info!(task_name = %submission.task_name, "pre-defined task submission");

    let events = state.pipeline.submit(submission).await?;
    let stream = ReceiverStream::new(events).map(|event| Ok(to_sse_event(&event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &Event) -> SseEvent {
    SseEvent::default()
        .event(event.name())
        .data(event.payload().to_string())
}

/// List of active sessions.
#[derive(Debug, Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionInfo>,
    total: usize,
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    let sessions = state.registry.list().await;
    let total = sessions.len();
    Json(SessionListResponse { sessions, total })
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionInfo>, ApiError> {
    let session = state
        .registry
        .get(session_id)
        .await
        .ok_or(GpudError::SessionNotFound(session_id))?;
    Ok(Json(session.info()))
}

#[derive(Debug, Serialize)]
struct KillResponse {
    success: bool,
    session_id: Uuid,
    message: String,
}

async fn kill_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<KillResponse>, ApiError> {
    // 404 before kill so a repeated delete reports the session as gone.
    state
        .registry
        .get(session_id)
        .await
        .ok_or(GpudError::SessionNotFound(session_id))?;

    state.registry.kill(session_id, "manual").await?;

    Ok(Json(KillResponse {
        success: true,
        session_id,
        message: "Session killed successfully".to_string(),
    }))
}

#[derive(Debug, Serialize)]
struct KeepaliveResponse {
    success: bool,
    session_id: Uuid,
    last_activity: chrono::DateTime<chrono::Utc>,
}

async fn keepalive_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<KeepaliveResponse>, ApiError> {
    let info = state.registry.keepalive(session_id).await?;
    Ok(Json(KeepaliveResponse {
        success: true,
        session_id,
        last_activity: info.last_activity,
    }))
}

/// Service health snapshot, unauthenticated.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    gpus: Vec<GpuStatus>,
    sessions: usize,
    tasks: usize,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let gpus = state.allocator.snapshot();
    let sessions = state.registry.count().await;
    let tasks = state.tracker.count();

    // No GPUs and no sessions means nothing can run at all; a GPU-less
    // service still serving sessions is merely degraded, as is a fully
    // leased device pool (the empty-pool case falls out of `all`).
    let status = if gpus.is_empty() && sessions == 0 {
        "unhealthy"
    } else if gpus.iter().all(|g| !g.is_available) {
        "degraded"
    } else {
        "healthy"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            gpus,
            sessions,
            tasks,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gpud_catalog::ConfigCatalog;
    use gpud_core::{GpudResult, Settings};
    use gpud_runtime::{ContainerRuntime, ContainerSpec, LogSource};
    use gpud_scheduler::SessionLimits;
    use gpud_store::{ModelCache, ModelFetcher};
    use std::time::Duration;

    struct NullRuntime;

    struct EmptySource;
    impl LogSource for EmptySource {
        fn next_line(&mut self) -> std::io::Result<Option<gpud_runtime::LogLine>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl ContainerRuntime for NullRuntime {
        async fn create_oneoff(&self, _spec: &ContainerSpec) -> GpudResult<String> {
            Ok("c".to_string())
        }
        async fn create_long_lived(&self, _spec: &ContainerSpec) -> GpudResult<String> {
            Ok("c".to_string())
        }
        async fn exec(
            &self,
            _container_id: &str,
            _argv: &[String],
        ) -> GpudResult<Box<dyn LogSource>> {
            Ok(Box::new(EmptySource))
        }
        async fn stream_logs(
            &self,
            _container_id: &str,
            _follow: bool,
        ) -> GpudResult<Box<dyn LogSource>> {
            Ok(Box::new(EmptySource))
        }
        async fn stop(&self, _container_id: &str, _timeout: Duration) -> GpudResult<()> {
            Ok(())
        }
        async fn remove(&self, _container_id: &str) -> GpudResult<()> {
            Ok(())
        }
    }

    struct NullFetcher;

    #[async_trait]
    impl ModelFetcher for NullFetcher {
        async fn download(
            &self,
            _model_id: &str,
            _dest_dir: &std::path::Path,
        ) -> Result<(), gpud_core::FetchCause> {
            Ok(())
        }
    }

    fn test_state() -> (AppState, tempfile::TempDir) {
        test_state_with(vec![0])
    }

    fn test_state_with(gpu_device_ids: Vec<u32>) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            gpu_device_ids,
            ..Settings::default()
        };
        let runtime = Arc::new(NullRuntime);
        let allocator = Arc::new(GpuAllocator::from_settings(&settings));
        let tracker = Arc::new(ActiveTasks::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&allocator),
            runtime.clone(),
            Arc::clone(&tracker),
            SessionLimits::from_settings(&settings),
        ));
        let pipeline = Arc::new(TaskPipeline::new(
            ConfigCatalog::new(dir.path(), 300, 1800),
            Arc::new(ModelCache::new(
                dir.path().to_path_buf(),
                false,
                Arc::new(NullFetcher),
            )),
            Arc::clone(&allocator),
            Arc::clone(&registry),
            runtime,
            Arc::clone(&tracker),
            Vec::new(),
        ));

        (
            AppState {
                pipeline,
                registry,
                allocator,
                tracker,
                api_key: "secret".to_string(),
            },
            dir,
        )
    }

    #[tokio::test]
    async fn test_create_router() {
        let (state, _dir) = test_state();
        let _router = create_router(state);
    }

    #[tokio::test]
    async fn test_health_reports_healthy_with_free_gpu() {
        let (state, _dir) = test_state();
        let (status, Json(body)) = health(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "healthy");
        assert_eq!(body.gpus.len(), 1);
        assert_eq!(body.sessions, 0);
        assert_eq!(body.tasks, 0);
    }

    #[tokio::test]
    async fn test_health_degrades_when_all_leased() {
        let (state, _dir) = test_state();
        state
            .allocator
            .lease(gpud_core::Difficulty::Low, Uuid::new_v4())
            .unwrap();
        let (_, Json(body)) = health(State(state)).await;
        assert_eq!(body.status, "degraded");
    }

    #[tokio::test]
    async fn test_health_unhealthy_without_gpus_or_sessions() {
        let (state, _dir) = test_state_with(Vec::new());
        let (_, Json(body)) = health(State(state)).await;
        assert_eq!(body.status, "unhealthy");
        assert!(body.gpus.is_empty());
    }

    #[test]
    fn test_sse_framing() {
        let event = Event::connection(gpud_core::ConnectionStatus::Allocated, Some(0), None);
        let sse = to_sse_event(&event);
        // The SSE event is rendered as `event: connection\ndata: {...}`.
        let rendered = format!("{:?}", sse);
        assert!(rendered.contains("connection"));
    }
}

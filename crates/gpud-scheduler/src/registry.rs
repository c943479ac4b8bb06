//! Session registry
//!
//! Owns every `Session` exclusively. Each session wraps a long-lived worker
//! container holding a model resident, a bounded FIFO request queue, and one
//! dispatcher task. Sessions die only through [`SessionRegistry::kill`]
//! (manual, reaper, or container failure).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use gpud_core::{
    Event, GpudError, GpudResult, ResolvedTask, SessionInfo, SessionStatus, Settings,
};
use gpud_runtime::{ContainerRuntime, ContainerSpec};

use crate::dispatcher;
use crate::gpu_allocator::GpuAllocator;
use crate::tracker::ActiveTasks;

const KILL_STOP_GRACE: Duration = Duration::from_secs(10);

/// Lifecycle limits shared by all sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub queue_max: usize,
}

impl SessionLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            idle_timeout: Duration::from_secs(settings.session_idle_timeout_seconds),
            max_lifetime: Duration::from_secs(settings.session_max_lifetime_seconds),
            queue_max: settings.session_queue_max_size,
        }
    }
}

/// One queued task request, dispatched FIFO by the session's dispatcher.
pub struct QueuedRequest {
    pub task_id: Uuid,
    pub task_name: String,
    /// Argv executed inside the session container
    pub exec_argv: Vec<String>,
    /// JSON task payload appended as the final exec argument
    pub payload: serde_json::Value,
    pub timeout: Duration,
    pub sink: mpsc::Sender<Event>,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    last_activity: DateTime<Utc>,
    last_activity_instant: Instant,
    current_task: Option<Uuid>,
    queued: usize,
    kill_reason: Option<String>,
}

/// A long-lived worker container with its request queue.
#[derive(Debug)]
pub struct Session {
    pub session_id: Uuid,
    pub gpu_id: u32,
    pub model_id: String,
    pub container_id: String,
    pub created_at: DateTime<Utc>,
    created_instant: Instant,
    idle_timeout: Duration,
    max_lifetime: Duration,
    state: StdMutex<SessionState>,
    queue_tx: mpsc::Sender<QueuedRequest>,
    killed: Notify,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.state.lock().expect("session lock poisoned").status
    }

    pub fn queue_size(&self) -> usize {
        self.state.lock().expect("session lock poisoned").queued
    }

    /// Bump `last_activity`; monotonic within the session's lifetime.
    pub fn mark_activity(&self) {
        let mut state = self.state.lock().expect("session lock poisoned");
        state.last_activity = Utc::now();
        state.last_activity_instant = Instant::now();
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state.lock().expect("session lock poisoned");
        SessionInfo {
            session_id: self.session_id,
            status: state.status,
            gpu_device_id: self.gpu_id,
            container_id: self.container_id.clone(),
            model_id: self.model_id.clone(),
            created_at: self.created_at,
            last_activity: state.last_activity,
            queue_size: state.queued,
            current_task_id: state.current_task,
        }
    }

    /// Reaper check: `max_lifetime` applies to every state, idle timeout
    /// only to `WAITING` sessions.
    pub fn timeout_reason(&self, now: Instant) -> Option<&'static str> {
        if now.duration_since(self.created_instant) > self.max_lifetime {
            return Some("max_lifetime");
        }
        let state = self.state.lock().expect("session lock poisoned");
        if state.status == SessionStatus::Waiting
            && now.duration_since(state.last_activity_instant) > self.idle_timeout
        {
            return Some("idle_timeout");
        }
        None
    }

    pub(crate) fn set_working(&self, task_id: Uuid) {
        let mut state = self.state.lock().expect("session lock poisoned");
        state.status = SessionStatus::Working;
        state.current_task = Some(task_id);
    }

    pub(crate) fn set_waiting(&self) {
        let mut state = self.state.lock().expect("session lock poisoned");
        if state.status != SessionStatus::Killed {
            state.status = SessionStatus::Waiting;
        }
        state.current_task = None;
        state.last_activity = Utc::now();
        state.last_activity_instant = Instant::now();
    }

    pub(crate) fn note_dequeued(&self) {
        let mut state = self.state.lock().expect("session lock poisoned");
        state.queued = state.queued.saturating_sub(1);
    }

    fn begin_kill(&self, reason: &str) {
        let mut state = self.state.lock().expect("session lock poisoned");
        state.status = SessionStatus::Killed;
        state.kill_reason = Some(reason.to_string());
    }

    pub(crate) fn kill_reason(&self) -> String {
        self.state
            .lock()
            .expect("session lock poisoned")
            .kill_reason
            .clone()
            .unwrap_or_else(|| "killed".to_string())
    }

    pub(crate) fn killed(&self) -> &Notify {
        &self.killed
    }
}

/// Maps `session_id → Session` and drives session lifecycle.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    allocator: Arc<GpuAllocator>,
    runtime: Arc<dyn ContainerRuntime>,
    tracker: Arc<ActiveTasks>,
    limits: SessionLimits,
}

impl SessionRegistry {
    pub fn new(
        allocator: Arc<GpuAllocator>,
        runtime: Arc<dyn ContainerRuntime>,
        tracker: Arc<ActiveTasks>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            allocator,
            runtime,
            tracker,
            limits,
        }
    }

    pub(crate) fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    pub(crate) fn tracker(&self) -> &ActiveTasks {
        &self.tracker
    }

    /// Route a session-kind request to a session.
    ///
    /// - explicit `session_id`: that session or `SessionNotFound` /
    ///   `InvalidSessionState`
    /// - `create_session`: reuse a `WAITING` session with the same model
    ///   (difficulty is deliberately not compared), else create
    /// - otherwise: always create
    ///
    /// The caller enqueues separately so its `connection` event precedes any
    /// dispatcher output.
    pub async fn find_or_create(
        self: &Arc<Self>,
        resolved: &ResolvedTask,
        model_dir: Option<std::path::PathBuf>,
    ) -> GpudResult<(Arc<Session>, bool)> {
        if let Some(session_id) = resolved.session_id {
            let session = self
                .get(session_id)
                .await
                .ok_or(GpudError::SessionNotFound(session_id))?;
            let status = session.status();
            if matches!(status, SessionStatus::Killed | SessionStatus::Initializing) {
                return Err(GpudError::InvalidSessionState { session_id, status });
            }
            return Ok((session, true));
        }

        if resolved.create_session {
            if let Some(session) = self.find_waiting(&resolved.model_id).await {
                info!(
                    session_id = %session.session_id,
                    model_id = %resolved.model_id,
                    "reusing waiting session"
                );
                return Ok((session, true));
            }
        }

        let session = self.create(resolved, model_dir).await?;
        Ok((session, false))
    }

    /// Reuse scan: `WAITING`, same model, queue not full.
    async fn find_waiting(&self, model_id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|s| {
                s.model_id == model_id
                    && s.status() == SessionStatus::Waiting
                    && s.queue_size() < self.limits.queue_max
            })
            .cloned()
    }

    async fn create(
        self: &Arc<Self>,
        resolved: &ResolvedTask,
        model_dir: Option<std::path::PathBuf>,
    ) -> GpudResult<Arc<Session>> {
        let session_id = Uuid::new_v4();

        // Guard releases the device if container creation fails.
        let lease = self
            .allocator
            .lease_guarded(resolved.difficulty, session_id)?;

        let short_id = session_id.simple().to_string();
        let mut env = resolved.worker_env();
        env.insert("SESSION_ID".to_string(), session_id.to_string());

        let spec = ContainerSpec {
            name: format!("gpud-session-{}", &short_id[..8]),
            image: resolved.action.docker_image.clone(),
            command: resolved.action.command.clone(),
            env,
            model_mount: model_dir,
            gpu_id: lease.gpu_id,
            labels: HashMap::from([
                ("gpud.session_id".to_string(), session_id.to_string()),
                ("gpud.model_id".to_string(), resolved.model_id.clone()),
                ("gpud.gpu_id".to_string(), lease.gpu_id.to_string()),
            ]),
        };

        let container_id = self.runtime.create_long_lived(&spec).await?;

        let (queue_tx, queue_rx) = mpsc::channel(self.limits.queue_max.max(1));
        let now = Utc::now();
        let session = Arc::new(Session {
            session_id,
            gpu_id: lease.gpu_id,
            model_id: resolved.model_id.clone(),
            container_id: container_id.clone(),
            created_at: now,
            created_instant: Instant::now(),
            idle_timeout: self.limits.idle_timeout,
            max_lifetime: self.limits.max_lifetime,
            state: StdMutex::new(SessionState {
                status: SessionStatus::Initializing,
                last_activity: now,
                last_activity_instant: Instant::now(),
                current_task: None,
                queued: 0,
                kill_reason: None,
            }),
            queue_tx,
            killed: Notify::new(),
        });

        self.sessions
            .write()
            .await
            .insert(session_id, Arc::clone(&session));

        tokio::spawn(dispatcher::run(
            Arc::clone(self),
            Arc::clone(&session),
            queue_rx,
        ));

        // Container is up and the dispatcher is attached.
        session.set_waiting();
        let gpu_id = lease.disarm();

        info!(
            session_id = %session_id,
            gpu = gpu_id,
            model_id = %resolved.model_id,
            container_id = %&container_id[..container_id.len().min(12)],
            "created session"
        );

        Ok(session)
    }

    /// Enqueue into the session's bounded FIFO queue.
    ///
    /// `QueueFull` does not touch `last_activity`; success bumps it.
    pub fn enqueue(&self, session: &Arc<Session>, request: QueuedRequest) -> GpudResult<()> {
        {
            let mut state = session.state.lock().expect("session lock poisoned");
            if state.status == SessionStatus::Killed {
                return Err(GpudError::InvalidSessionState {
                    session_id: session.session_id,
                    status: SessionStatus::Killed,
                });
            }
            if state.queued >= self.limits.queue_max {
                return Err(GpudError::QueueFull(session.session_id));
            }
            state.queued += 1;
            state.last_activity = Utc::now();
            state.last_activity_instant = Instant::now();
        }

        let task_id = request.task_id;
        if session.queue_tx.try_send(request).is_err() {
            // The counter gates capacity; a failed send means the dispatcher
            // is gone.
            session.note_dequeued();
            return Err(GpudError::QueueFull(session.session_id));
        }

        debug!(
            session_id = %session.session_id,
            task_id = %task_id,
            queue_size = session.queue_size(),
            "enqueued request"
        );
        Ok(())
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().map(|s| s.info()).collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub(crate) async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Bump `last_activity` without enqueuing.
    pub async fn keepalive(&self, session_id: Uuid) -> GpudResult<SessionInfo> {
        let session = self
            .get(session_id)
            .await
            .ok_or(GpudError::SessionNotFound(session_id))?;
        session.mark_activity();
        Ok(session.info())
    }

    /// Kill a session: terminal state, container stopped and removed, GPU
    /// released, queue drained with failure events. Idempotent.
    pub async fn kill(&self, session_id: Uuid, reason: &str) -> GpudResult<()> {
        let session = { self.sessions.write().await.remove(&session_id) };
        let Some(session) = session else {
            debug!(session_id = %session_id, "kill of unknown session ignored");
            return Ok(());
        };

        info!(session_id = %session_id, reason = reason, "killing session");
        session.begin_kill(reason);

        let _ = self
            .runtime
            .stop(&session.container_id, KILL_STOP_GRACE)
            .await;
        let _ = self.runtime.remove(&session.container_id).await;

        self.allocator.release(session.gpu_id);
        session.killed.notify_one();

        Ok(())
    }
}

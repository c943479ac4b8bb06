//! Per-request execution pipeline
//!
//! Pipeline per submission:
//! 1. resolve the task name against the catalog (with request overrides)
//! 2. ensure the model directory is on the host (skipped without a
//!    `model_paths` entry)
//! 3. dispatch on task kind: lease-and-run for one-offs, find-or-create and
//!    enqueue for sessions
//!
//! Errors before the first event surface as typed errors (HTTP status at the
//! API layer); later failures arrive in-band as `connection{failed}` +
//! `task_finish{failed}` events, and leased resources are released on every
//! path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use gpud_catalog::ConfigCatalog;
use gpud_core::{
    ConnectionStatus, Event, FinishStatus, GpudError, GpudResult, ResolvedTask, TaskKind,
    TaskSubmission,
};
use gpud_runtime::{
    bridge_log_source, ContainerRuntime, ContainerSpec, InstanceStreamer, StreamMode,
};
use gpud_scheduler::{ActiveTasks, GpuAllocator, GpuLease, QueuedRequest, SessionRegistry};
use gpud_store::ModelCache;

const EVENT_SINK_CAPACITY: usize = 64;
const LOG_BRIDGE_CAPACITY: usize = 256;

/// Orchestrates one task request from submission to event stream.
pub struct TaskPipeline {
    catalog: ConfigCatalog,
    cache: Arc<ModelCache>,
    allocator: Arc<GpuAllocator>,
    registry: Arc<SessionRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    tracker: Arc<ActiveTasks>,
    allowed_images: Vec<String>,
}

impl TaskPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: ConfigCatalog,
        cache: Arc<ModelCache>,
        allocator: Arc<GpuAllocator>,
        registry: Arc<SessionRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        tracker: Arc<ActiveTasks>,
        allowed_images: Vec<String>,
    ) -> Self {
        Self {
            catalog,
            cache,
            allocator,
            registry,
            runtime,
            tracker,
            allowed_images,
        }
    }

    pub fn tracker(&self) -> Arc<ActiveTasks> {
        Arc::clone(&self.tracker)
    }

    /// Execute a submission; returns the event stream once placement has
    /// succeeded and the first `connection` event is in flight.
    pub async fn submit(&self, submission: TaskSubmission) -> GpudResult<mpsc::Receiver<Event>> {
        let task_id = Uuid::new_v4();
        info!(
            task_id = %task_id,
            task_name = %submission.task_name,
            "task submission"
        );

        let resolved = self
            .catalog
            .resolve(&submission.task_name, &submission.overrides())?;

        if !self.allowed_images.is_empty()
            && !self.allowed_images.contains(&resolved.action.docker_image)
        {
            return Err(GpudError::ImageNotAllowed(
                resolved.action.docker_image.clone(),
            ));
        }

        // A task without a model_paths entry runs without a mounted model.
        let model_dir = match &resolved.model_path {
            Some(model_path) => Some(
                self.cache
                    .ensure_at(&resolved.model_id, Some(&model_path.path))
                    .await?,
            ),
            None => None,
        };

        match resolved.kind {
            TaskKind::Oneoff => self.submit_oneoff(task_id, resolved, model_dir).await,
            TaskKind::Session => self.submit_session(task_id, resolved, model_dir).await,
        }
    }

    async fn submit_oneoff(
        &self,
        task_id: Uuid,
        resolved: ResolvedTask,
        model_dir: Option<PathBuf>,
    ) -> GpudResult<mpsc::Receiver<Event>> {
        let lease = self.allocator.lease_guarded(resolved.difficulty, task_id)?;
        let (sink, stream) = mpsc::channel(EVENT_SINK_CAPACITY);

        // Capacity just reserved; the send cannot block.
        let _ = sink
            .send(Event::connection(
                ConnectionStatus::Allocated,
                Some(lease.gpu_id),
                None,
            ))
            .await;

        let runtime = Arc::clone(&self.runtime);
        let tracker = Arc::clone(&self.tracker);
        tokio::spawn(run_oneoff(
            runtime, tracker, task_id, resolved, model_dir, lease, sink,
        ));

        Ok(stream)
    }

    async fn submit_session(
        &self,
        task_id: Uuid,
        resolved: ResolvedTask,
        model_dir: Option<PathBuf>,
    ) -> GpudResult<mpsc::Receiver<Event>> {
        let (session, reused) = self.registry.find_or_create(&resolved, model_dir).await?;

        let (sink, stream) = mpsc::channel(EVENT_SINK_CAPACITY);
        let status = if reused {
            ConnectionStatus::SessionFound
        } else {
            ConnectionStatus::Allocated
        };
        let _ = sink
            .send(Event::connection(
                status,
                Some(session.gpu_id),
                Some(session.session_id),
            ))
            .await;

        let payload = serde_json::json!({
            "task_id": task_id,
            "model_id": resolved.model_id,
            "metadata": resolved.metadata,
        });

        let enqueued = self.registry.enqueue(
            &session,
            QueuedRequest {
                task_id,
                task_name: resolved.task_name.clone(),
                exec_argv: resolved.action.exec_argv().to_vec(),
                payload,
                timeout: resolved.timeout,
                sink,
            },
        );

        if let Err(err) = enqueued {
            // A session created for this very request must not outlive its
            // failure; reused sessions keep serving their other callers.
            if !reused {
                let _ = self
                    .registry
                    .kill(session.session_id, "enqueue failed")
                    .await;
            }
            return Err(err);
        }

        Ok(stream)
    }
}

/// Spawned one-off execution: create the container, stream it, release the
/// GPU on every path. The container auto-removes itself on exit.
async fn run_oneoff(
    runtime: Arc<dyn ContainerRuntime>,
    tracker: Arc<ActiveTasks>,
    task_id: Uuid,
    resolved: ResolvedTask,
    model_dir: Option<PathBuf>,
    lease: GpuLease,
    sink: mpsc::Sender<Event>,
) {
    tracker.register(task_id, &resolved.task_name);

    let outcome = run_oneoff_inner(&runtime, task_id, &resolved, model_dir, &lease, &sink).await;
    if let Err(err) = outcome {
        warn!(task_id = %task_id, error = %err, "one-off pipeline failed");
        let _ = sink.send(Event::connection_failed(err.to_string())).await;
        let _ = sink
            .send(Event::task_finish(
                FinishStatus::Failed,
                None,
                Some(err.to_string()),
            ))
            .await;
    }

    tracker.unregister(task_id);
    // Dropping the lease releases the GPU.
    drop(lease);
}

async fn run_oneoff_inner(
    runtime: &Arc<dyn ContainerRuntime>,
    task_id: Uuid,
    resolved: &ResolvedTask,
    model_dir: Option<PathBuf>,
    lease: &GpuLease,
    sink: &mpsc::Sender<Event>,
) -> GpudResult<()> {
    let short_id = task_id.simple().to_string();
    let mut env = resolved.worker_env();
    env.insert("TASK_ID".to_string(), task_id.to_string());

    let spec = ContainerSpec {
        name: format!("gpud-task-{}", &short_id[..8]),
        image: resolved.action.docker_image.clone(),
        command: resolved.action.command.clone(),
        env,
        model_mount: model_dir,
        gpu_id: lease.gpu_id,
        labels: HashMap::from([
            ("gpud.task_id".to_string(), task_id.to_string()),
            ("gpud.gpu_id".to_string(), lease.gpu_id.to_string()),
            ("gpud.type".to_string(), "oneoff".to_string()),
        ]),
    };

    let container_id = runtime.create_oneoff(&spec).await?;
    let source = runtime.stream_logs(&container_id, true).await?;
    let (lines, _exit) = bridge_log_source(source, LOG_BRIDGE_CAPACITY);

    let streamer = InstanceStreamer::new(
        task_id,
        container_id,
        resolved.timeout,
        StreamMode::Oneoff,
        Arc::clone(runtime),
    );
    let status = streamer.run(lines, sink).await;

    info!(task_id = %task_id, status = ?status, "one-off task finished");
    Ok(())
}

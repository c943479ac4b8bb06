//! Per-session request dispatcher
//!
//! Exactly one dispatcher task per session: it pulls queued requests in
//! strict FIFO order, runs each through `docker exec` against the resident
//! container, and streams the output events to the request's sink.
//! Task-level failures return the session to `WAITING`; only an exec that
//! cannot start kills the session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use gpud_core::{Event, FinishStatus};
use gpud_runtime::{bridge_log_source, InstanceStreamer, StreamMode};

use crate::registry::{QueuedRequest, Session, SessionRegistry};

const LOG_BRIDGE_CAPACITY: usize = 256;

pub(crate) async fn run(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    mut queue: mpsc::Receiver<QueuedRequest>,
) {
    debug!(session_id = %session.session_id, "dispatcher started");

    loop {
        tokio::select! {
            _ = session.killed().notified() => {
                drain_queue(&session, &mut queue).await;
                break;
            }
            request = queue.recv() => {
                let Some(request) = request else { break };
                session.note_dequeued();

                // The caller vanished before dispatch; treat the request as
                // removed from the queue.
                if request.sink.is_closed() {
                    debug!(
                        session_id = %session.session_id,
                        task_id = %request.task_id,
                        "skipping request with disconnected caller"
                    );
                    continue;
                }

                let task_id = request.task_id;
                registry.tracker().register(task_id, &request.task_name);
                session.set_working(task_id);
                let container_alive = execute(&registry, &session, request).await;
                session.set_waiting();
                registry.tracker().unregister(task_id);

                if !container_alive {
                    error!(
                        session_id = %session.session_id,
                        task_id = %task_id,
                        "session container failed, killing session"
                    );
                    let _ = registry
                        .kill(session.session_id, "container failure")
                        .await;
                    // The kill notification drains whatever is still queued.
                }
            }
        }
    }

    debug!(session_id = %session.session_id, "dispatcher stopped");
}

/// Run one request; returns false when the container itself is unusable.
async fn execute(
    registry: &Arc<SessionRegistry>,
    session: &Arc<Session>,
    request: QueuedRequest,
) -> bool {
    info!(
        session_id = %session.session_id,
        task_id = %request.task_id,
        "dispatching session request"
    );

    let mut argv = request.exec_argv.clone();
    argv.push(request.payload.to_string());

    let source = match registry.runtime().exec(&session.container_id, &argv).await {
        Ok(source) => source,
        Err(err) => {
            let _ = request
                .sink
                .send(Event::task_finish(
                    FinishStatus::Failed,
                    None,
                    Some(err.to_string()),
                ))
                .await;
            return false;
        }
    };

    let (lines, _exit) = bridge_log_source(source, LOG_BRIDGE_CAPACITY);
    let streamer = InstanceStreamer::new(
        request.task_id,
        session.container_id.clone(),
        request.timeout,
        StreamMode::SessionRequest,
        registry.runtime(),
    );

    let status = streamer.run(lines, &request.sink).await;
    debug!(
        session_id = %session.session_id,
        task_id = %request.task_id,
        status = ?status,
        "session request finished"
    );

    // Worker-level failures and timeouts leave the session alive.
    true
}

/// Fail every still-queued request with the session's kill reason.
async fn drain_queue(session: &Arc<Session>, queue: &mut mpsc::Receiver<QueuedRequest>) {
    let reason = session.kill_reason();
    while let Ok(request) = queue.try_recv() {
        session.note_dequeued();
        let _ = request
            .sink
            .send(Event::task_finish(
                FinishStatus::Failed,
                None,
                Some(reason.clone()),
            ))
            .await;
    }
}

//! Per-request event streaming
//!
//! Turns a container's raw log lines into the typed event sequence a caller
//! consumes, enforcing the request deadline and guaranteeing exactly one
//! `task_finish` closes the stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gpud_core::{Event, FinishStatus, LogLevel};

use crate::logs::{LogLine, LogOrigin};
use crate::traits::ContainerRuntime;

const STOP_GRACE: Duration = Duration::from_secs(10);

/// Whether the stream owns the container it reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// One-off task: deadline or caller disconnect stops the container.
    Oneoff,
    /// Session request over `exec`: the session container outlives the
    /// request; a deadline or disconnect only ends this stream.
    SessionRequest,
}

/// Streams one task execution to an event sink.
pub struct InstanceStreamer {
    task_id: Uuid,
    container_id: String,
    timeout: Duration,
    mode: StreamMode,
    runtime: Arc<dyn ContainerRuntime>,
}

impl InstanceStreamer {
    pub fn new(
        task_id: Uuid,
        container_id: String,
        timeout: Duration,
        mode: StreamMode,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            task_id,
            container_id,
            timeout,
            mode,
            runtime,
        }
    }

    /// Consume bridged log lines and emit events into the sink until a
    /// terminal condition: a worker `finish` frame, end of stream, the
    /// deadline, or (for one-offs) a caller disconnect.
    ///
    /// Exactly one `task_finish` is emitted before returning.
    pub async fn run(
        &self,
        mut lines: mpsc::Receiver<LogLine>,
        sink: &mpsc::Sender<Event>,
    ) -> FinishStatus {
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        info!(
            task_id = %self.task_id,
            container_id = %self.container_id,
            timeout_seconds = self.timeout.as_secs(),
            "streaming task execution"
        );

        if !self.emit(sink, Event::worker_created(self.container_id.clone())).await
            && self.mode == StreamMode::Oneoff
        {
            return self.cancel(started).await;
        }

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        task_id = %self.task_id,
                        timeout_seconds = self.timeout.as_secs(),
                        "task exceeded timeout"
                    );
                    if self.mode == StreamMode::Oneoff {
                        let _ = self.runtime.stop(&self.container_id, STOP_GRACE).await;
                    }
                    self.emit(
                        sink,
                        Event::task_finish(
                            FinishStatus::Timeout,
                            Some(started.elapsed().as_secs()),
                            Some("task timeout exceeded".to_string()),
                        ),
                    )
                    .await;
                    return FinishStatus::Timeout;
                }
                line = lines.recv() => {
                    match line {
                        None => {
                            // Stream ended without a finish frame.
                            info!(task_id = %self.task_id, "worker exited without finish");
                            self.emit(
                                sink,
                                Event::task_finish(
                                    FinishStatus::Failed,
                                    Some(started.elapsed().as_secs()),
                                    Some("worker exited without finish".to_string()),
                                ),
                            )
                            .await;
                            return FinishStatus::Failed;
                        }
                        Some(raw) => {
                            let level = match raw.origin {
                                LogOrigin::Stdout => LogLevel::Info,
                                LogOrigin::Stderr => LogLevel::Warning,
                            };
                            let Some(event) = Event::parse_log_line(&raw.line, level) else {
                                continue;
                            };

                            let finish = match &event {
                                Event::TaskFinish { status, .. } => Some(*status),
                                _ => None,
                            };

                            // Session requests keep draining for the finish
                            // frame even after the caller disconnected; the
                            // failed sends simply drop the events.
                            if !self.emit(sink, event).await && self.mode == StreamMode::Oneoff {
                                return self.cancel(started).await;
                            }

                            if let Some(status) = finish {
                                debug!(task_id = %self.task_id, status = ?status, "worker finished");
                                return status;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn emit(&self, sink: &mpsc::Sender<Event>, event: Event) -> bool {
        sink.send(event).await.is_ok()
    }

    async fn cancel(&self, started: Instant) -> FinishStatus {
        info!(task_id = %self.task_id, "caller disconnected, stopping one-off container");
        let _ = self.runtime.stop(&self.container_id, STOP_GRACE).await;
        debug!(
            task_id = %self.task_id,
            elapsed_seconds = started.elapsed().as_secs(),
            "stream cancelled"
        );
        FinishStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gpud_core::GpudResult;
    use std::sync::Mutex;

    use crate::logs::LogSource;
    use crate::traits::ContainerSpec;

    #[derive(Default)]
    struct RecordingRuntime {
        stopped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn create_oneoff(&self, _spec: &ContainerSpec) -> GpudResult<String> {
            Ok("c-1".to_string())
        }
        async fn create_long_lived(&self, _spec: &ContainerSpec) -> GpudResult<String> {
            Ok("c-1".to_string())
        }
        async fn exec(
            &self,
            _container_id: &str,
            _argv: &[String],
        ) -> GpudResult<Box<dyn LogSource>> {
            unimplemented!("not used in streamer tests")
        }
        async fn stream_logs(
            &self,
            _container_id: &str,
            _follow: bool,
        ) -> GpudResult<Box<dyn LogSource>> {
            unimplemented!("not used in streamer tests")
        }
        async fn stop(&self, container_id: &str, _timeout: Duration) -> GpudResult<()> {
            self.stopped.lock().unwrap().push(container_id.to_string());
            Ok(())
        }
        async fn remove(&self, _container_id: &str) -> GpudResult<()> {
            Ok(())
        }
    }

    fn streamer(
        timeout: Duration,
        mode: StreamMode,
        runtime: Arc<RecordingRuntime>,
    ) -> InstanceStreamer {
        InstanceStreamer::new(Uuid::new_v4(), "c-oneoff-1".to_string(), timeout, mode, runtime)
    }

    fn stdout(line: &str) -> LogLine {
        LogLine {
            line: line.to_string(),
            origin: LogOrigin::Stdout,
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_happy_path_ends_with_worker_finish() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (line_tx, line_rx) = mpsc::channel(16);
        let (sink, mut events_rx) = mpsc::channel(16);

        line_tx
            .send(stdout(r#"{"event":"text_delta","delta":"hel"}"#))
            .await
            .unwrap();
        line_tx
            .send(stdout(r#"{"event":"finish","status":"completed","elapsed_seconds":1}"#))
            .await
            .unwrap();

        let status = streamer(Duration::from_secs(30), StreamMode::Oneoff, runtime)
            .run(line_rx, &sink)
            .await;
        drop(sink);

        assert_eq!(status, FinishStatus::Completed);
        let events = drain(&mut events_rx).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Event::Worker { .. }));
        assert!(matches!(events[1], Event::TextDelta { .. }));
        assert!(
            matches!(&events[2], Event::TaskFinish { status: FinishStatus::Completed, .. })
        );
    }

    #[tokio::test]
    async fn test_exit_without_finish_fails() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (line_tx, line_rx) = mpsc::channel(16);
        let (sink, mut events_rx) = mpsc::channel(16);

        line_tx.send(stdout("plain progress line")).await.unwrap();
        drop(line_tx);

        let status = streamer(Duration::from_secs(30), StreamMode::Oneoff, runtime)
            .run(line_rx, &sink)
            .await;
        drop(sink);

        assert_eq!(status, FinishStatus::Failed);
        let events = drain(&mut events_rx).await;
        let last = events.last().unwrap();
        assert!(matches!(
            last,
            Event::TaskFinish { status: FinishStatus::Failed, error: Some(e), .. }
                if e == "worker exited without finish"
        ));
        // Only one task_finish in the whole stream.
        let finishes = events
            .iter()
            .filter(|e| matches!(e, Event::TaskFinish { .. }))
            .count();
        assert_eq!(finishes, 1);
    }

    #[tokio::test]
    async fn test_stderr_lines_become_warning_logs() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (line_tx, line_rx) = mpsc::channel(16);
        let (sink, mut events_rx) = mpsc::channel(16);

        line_tx
            .send(LogLine {
                line: "CUDA warning".to_string(),
                origin: LogOrigin::Stderr,
            })
            .await
            .unwrap();
        drop(line_tx);

        streamer(Duration::from_secs(30), StreamMode::Oneoff, runtime)
            .run(line_rx, &sink)
            .await;
        drop(sink);

        let events = drain(&mut events_rx).await;
        assert_eq!(
            events[1],
            Event::logs("CUDA warning", LogLevel::Warning)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_oneoff_container() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (_line_tx, line_rx) = mpsc::channel::<LogLine>(16);
        let (sink, mut events_rx) = mpsc::channel(16);

        let status = streamer(Duration::from_secs(2), StreamMode::Oneoff, runtime.clone())
            .run(line_rx, &sink)
            .await;
        drop(sink);

        assert_eq!(status, FinishStatus::Timeout);
        assert_eq!(
            runtime.stopped.lock().unwrap().as_slice(),
            &["c-oneoff-1".to_string()]
        );
        let events = drain(&mut events_rx).await;
        assert!(matches!(
            events.last().unwrap(),
            Event::TaskFinish { status: FinishStatus::Timeout, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_leaves_session_container_running() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (_line_tx, line_rx) = mpsc::channel::<LogLine>(16);
        let (sink, _events_rx) = mpsc::channel(16);

        let status = streamer(
            Duration::from_secs(2),
            StreamMode::SessionRequest,
            runtime.clone(),
        )
        .run(line_rx, &sink)
        .await;

        assert_eq!(status, FinishStatus::Timeout);
        assert!(runtime.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oneoff_disconnect_stops_container() {
        let runtime = Arc::new(RecordingRuntime::default());
        let (line_tx, line_rx) = mpsc::channel(16);
        let (sink, events_rx) = mpsc::channel(16);
        drop(events_rx);

        line_tx.send(stdout("ignored")).await.unwrap();

        let status = streamer(Duration::from_secs(30), StreamMode::Oneoff, runtime.clone())
            .run(line_rx, &sink)
            .await;

        assert_eq!(status, FinishStatus::Cancelled);
        assert!(!runtime.stopped.lock().unwrap().is_empty());
    }
}

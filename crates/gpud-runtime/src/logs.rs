//! Blocking log sources and the worker-pool bridge
//!
//! Container log producers block on the next line. Each source is drained on
//! a blocking worker task and its lines handed back through a channel, so
//! the scheduler stays responsive while many streams are active. This is the
//! only place blocking I/O touches the runtime.

use std::io::{BufRead, BufReader};
use std::process::Child;
use std::sync::mpsc as std_mpsc;
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Which pipe a line came from. Stderr lines degrade to warning-level logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOrigin {
    Stdout,
    Stderr,
}

/// One raw line from a container.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub line: String,
    pub origin: LogOrigin,
}

/// Synchronous line producer. `next_line` blocks until a line is available
/// and returns `None` at end of stream; `exit_code` is meaningful only after
/// that.
pub trait LogSource: Send {
    fn next_line(&mut self) -> std::io::Result<Option<LogLine>>;

    fn exit_code(&mut self) -> Option<i32> {
        None
    }
}

/// Hand a blocking source to the worker pool and expose it as a channel.
///
/// The pump stops when the source ends or every receiver is dropped; the
/// exit channel resolves once the source reports end of stream.
pub fn bridge_log_source(
    mut source: Box<dyn LogSource>,
    capacity: usize,
) -> (mpsc::Receiver<LogLine>, oneshot::Receiver<Option<i32>>) {
    let (line_tx, line_rx) = mpsc::channel(capacity);
    let (exit_tx, exit_rx) = oneshot::channel();

    tokio::task::spawn_blocking(move || {
        loop {
            match source.next_line() {
                Ok(Some(line)) => {
                    if line_tx.blocking_send(line).is_err() {
                        // Consumer went away; dropping the source tears the
                        // producer down.
                        debug!("log consumer dropped, stopping pump");
                        return;
                    }
                }
                Ok(None) => {
                    let _ = exit_tx.send(source.exit_code());
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "log source read failed");
                    let _ = exit_tx.send(source.exit_code());
                    return;
                }
            }
        }
    });

    (line_rx, exit_rx)
}

/// Log source over a spawned child process, merging stdout and stderr.
///
/// One reader thread per pipe feeds a shared channel; `next_line` drains it
/// until both pipes close, then reaps the child for its exit code.
pub struct ChildLogSource {
    child: Child,
    rx: std_mpsc::Receiver<LogLine>,
    exit: Option<i32>,
    reaped: bool,
}

impl ChildLogSource {
    pub fn new(mut child: Child) -> Self {
        let (tx, rx) = std_mpsc::channel();

        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            thread::spawn(move || read_pipe(stdout, LogOrigin::Stdout, tx));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            thread::spawn(move || read_pipe(stderr, LogOrigin::Stderr, tx));
        }
        drop(tx);

        Self {
            child,
            rx,
            exit: None,
            reaped: false,
        }
    }
}

fn read_pipe<R: std::io::Read>(pipe: R, origin: LogOrigin, tx: std_mpsc::Sender<LogLine>) {
    let reader = BufReader::new(pipe);
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(LogLine { line, origin }).is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

impl LogSource for ChildLogSource {
    fn next_line(&mut self) -> std::io::Result<Option<LogLine>> {
        match self.rx.recv() {
            Ok(line) => Ok(Some(line)),
            Err(_) => {
                // Both reader threads finished; reap the child.
                if !self.reaped {
                    self.exit = self.child.wait().ok().and_then(|status| status.code());
                    self.reaped = true;
                }
                Ok(None)
            }
        }
    }

    fn exit_code(&mut self) -> Option<i32> {
        self.exit
    }
}

impl Drop for ChildLogSource {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn_sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_child_source_yields_lines_and_exit() {
        let child = spawn_sh("echo one; echo two 1>&2; exit 3");
        let mut source = ChildLogSource::new(child);

        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();
        while let Some(line) = source.next_line().unwrap() {
            match line.origin {
                LogOrigin::Stdout => stdout_lines.push(line.line),
                LogOrigin::Stderr => stderr_lines.push(line.line),
            }
        }

        assert_eq!(stdout_lines, vec!["one".to_string()]);
        assert_eq!(stderr_lines, vec!["two".to_string()]);
        assert_eq!(source.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_bridge_delivers_lines_in_order() {
        let child = spawn_sh("printf 'a\\nb\\nc\\n'");
        let (mut rx, exit) = bridge_log_source(Box::new(ChildLogSource::new(child)), 16);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line.line);
        }
        assert_eq!(lines, vec!["a", "b", "c"]);
        assert_eq!(exit.await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_bridge_stops_when_receiver_dropped() {
        let child = spawn_sh("while true; do echo tick; sleep 0.01; done");
        let (rx, _exit) = bridge_log_source(Box::new(ChildLogSource::new(child)), 4);
        drop(rx);
        // The pump notices the closed channel and drops the source, which
        // kills the child; nothing to assert beyond not hanging.
    }
}

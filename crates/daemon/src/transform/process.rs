//! Supervised subprocess execution with streamed output.
//!
//! [`spawn_streaming`] launches a command and returns a receiver that
//! yields the process's stdout and stderr as lines while it runs, followed
//! by exactly one [`ProcessEvent::Exited`]. ffmpeg redraws its progress line
//! with carriage returns, so both `\r` and `\n` end a line.

use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with a status code.
    Code(i32),
    /// Killed by a signal.
    Signal,
    /// Never started (missing binary, permission, ...).
    SpawnFailed(String),
    /// Started but its status could not be collected.
    WaitFailed(String),
}

impl ExitKind {
    pub fn success(&self) -> bool {
        matches!(self, ExitKind::Code(0))
    }
}

/// Items produced while supervising a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of stdout or stderr, terminator stripped.
    Output(String),
    /// Terminal event; always the last item.
    Exited(ExitKind),
}

/// Splits a byte stream into lines on `\n` or `\r`, skipping empty lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk and return every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush whatever is left after end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let line = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            Some(line)
        }
    }
}

async fn forward_lines<R>(mut reader: R, tx: mpsc::UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    let _ = tx.send(ProcessEvent::Output(line));
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read process output");
                break;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        let _ = tx.send(ProcessEvent::Output(line));
    }
}

/// Launch `cmd` and stream its output.
///
/// Spawn failures are reported through the stream as
/// `Exited(SpawnFailed)` rather than returned, so callers handle every
/// outcome in one place.
pub fn spawn_streaming(mut cmd: Command) -> mpsc::UnboundedReceiver<ProcessEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(false);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(program = %program, error = %e, "Failed to spawn process");
            let _ = tx.send(ProcessEvent::Exited(ExitKind::SpawnFailed(e.to_string())));
            return rx;
        }
    };
    debug!(program = %program, pid = ?child.id(), "Process started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tokio::spawn(async move {
        let stdout_task = stdout.map(|out| tokio::spawn(forward_lines(out, tx.clone())));
        let stderr_task = stderr.map(|err| tokio::spawn(forward_lines(err, tx.clone())));

        let status = child.wait().await;

        // Drain both pipes before announcing the exit.
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            let _ = task.await;
        }

        let exit = match status {
            Ok(status) => match status.code() {
                Some(code) => ExitKind::Code(code),
                None => ExitKind::Signal,
            },
            Err(e) => ExitKind::WaitFailed(e.to_string()),
        };
        debug!(program = %program, exit = ?exit, "Process finished");
        let _ = tx.send(ProcessEvent::Exited(exit));
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_splitter_handles_both_terminators() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.push(b"frame=1\rframe=2\r"), vec!["frame=1", "frame=2"]);
        assert_eq!(splitter.push(b"par"), Vec::<String>::new());
        assert_eq!(splitter.push(b"tial\r\nnext"), vec!["partial"]);
        assert_eq!(splitter.finish(), Some("next".to_string()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_exit_kind_success() {
        assert!(ExitKind::Code(0).success());
        assert!(!ExitKind::Code(1).success());
        assert!(!ExitKind::Signal.success());
        assert!(!ExitKind::SpawnFailed("missing".into()).success());
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_as_event() {
        let cmd = Command::new("/nonexistent/mergemux-test-binary");
        let events = collect(spawn_streaming(cmd)).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ProcessEvent::Exited(ExitKind::SpawnFailed(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_precedes_exit_and_keeps_order() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("echo one; echo two; echo oops 1>&2; exit 3");
        let events = collect(spawn_streaming(cmd)).await;

        let last = events.last().cloned();
        assert_eq!(last, Some(ProcessEvent::Exited(ExitKind::Code(3))));

        let stdout: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ProcessEvent::Output(line) if line != "oops" => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stdout, vec!["one", "two"]);
        assert!(events.contains(&ProcessEvent::Output("oops".to_string())));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ProcessEvent::Exited(_)))
                .count(),
            1
        );
    }
}

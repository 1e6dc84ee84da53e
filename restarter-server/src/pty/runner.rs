//! Spawning the supervised child under a PTY
//!
//! The runner owns the spawn recipe (argv, history size, kill escalation
//! delay) and produces one [`ChildHandle`] per start. Each start launches
//! two background tasks: a blocking output pump copying PTY bytes into the
//! child's ring, and a waiter that closes the master, restores the host
//! terminal, and emits exactly one `ChildExited` event.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize, SlavePty,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use restarter_utils::{RestarterError, Result};

use crate::attach::restore_cooked;
use crate::ringbuf::RingBuffer;
use crate::supervisor::Event;

use super::ChildHandle;

/// Read buffer size for the PTY output pump
const READ_BUFFER_SIZE: usize = 4096;

/// Spawns and tracks the one supervised child
pub struct ChildRunner {
    argv: Vec<String>,
    history_bytes: usize,
    hard_kill_delay: Duration,
    events: mpsc::Sender<Event>,
}

impl ChildRunner {
    pub fn new(
        argv: Vec<String>,
        history_bytes: usize,
        hard_kill_delay: Duration,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            argv,
            history_bytes,
            hard_kill_delay,
            events,
        }
    }

    /// Fork/exec the command on a fresh PTY pair and launch its I/O tasks
    ///
    /// Guarantees exactly one `ChildExited` event per successful start, and
    /// that the PTY master is closed before that event is observable.
    pub fn start(&self) -> Result<ChildHandle> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| RestarterError::spawn("empty command"))?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| RestarterError::pty(format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RestarterError::spawn(format!("{}: {}", program, e)))?;

        info!(command = ?self.argv, "child started");

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RestarterError::pty(format!("failed to clone reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| RestarterError::pty(format!("failed to get writer: {}", e)))?;
        let master = pair.master;

        let ring = Arc::new(RingBuffer::new(self.history_bytes));
        let kill_requested = Arc::new(AtomicBool::new(false));
        let exited = CancellationToken::new();
        let started_at = Instant::now();

        // Output pump: merged stdout/stderr into the history ring.
        let pump_ring = ring.clone();
        tokio::task::spawn_blocking(move || pump_output(reader, pump_ring));

        // Waiter: observe the exit, close the master, restore the terminal,
        // then report to the supervisor.
        let waiter_flag = kill_requested.clone();
        let waiter_token = exited.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let status = tokio::task::spawn_blocking(move || child.wait()).await;

            // The master must be gone before ChildExited is observable.
            drop(master);
            restore_cooked();

            match status {
                Ok(Ok(status)) => info!(
                    exit_code = status.exit_code(),
                    uptime = ?started_at.elapsed(),
                    "child exited"
                ),
                Ok(Err(e)) => warn!(error = %e, "failed waiting on child"),
                Err(e) => warn!(error = %e, "child waiter task failed"),
            }

            let kill_requested = waiter_flag.load(Ordering::SeqCst);
            waiter_token.cancel();
            let _ = events.send(Event::ChildExited { kill_requested }).await;
        });

        Ok(ChildHandle::new(
            writer,
            killer,
            pid,
            ring,
            kill_requested,
            exited,
            self.hard_kill_delay,
        ))
    }
}

fn pump_output(mut reader: Box<dyn Read + Send>, ring: Arc<RingBuffer>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                ring.write(&buf[..n]);
            }
            Err(e) => {
                // The PTY read fails with EIO once the slave side is gone;
                // any error here ends the stream.
                debug!(error = %e, "pty output stream closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn runner_for(argv: &[&str], events: mpsc::Sender<Event>) -> ChildRunner {
        ChildRunner::new(
            argv.iter().map(|s| s.to_string()).collect(),
            1024,
            Duration::from_millis(300),
            events,
        )
    }

    async fn expect_exit(rx: &mut mpsc::Receiver<Event>) -> bool {
        let ev = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("exit event in time")
            .expect("channel open");
        match ev {
            Event::ChildExited { kill_requested } => kill_requested,
            other => panic!("expected ChildExited, got {:?}", other),
        }
    }

    /// Poll the ring until it contains `needle` or the deadline passes
    async fn ring_contains(handle: &ChildHandle, needle: &[u8]) -> bool {
        for _ in 0..50 {
            let snap = handle.ring().snapshot();
            if snap.windows(needle.len()).any(|w| w == needle) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_exactly_one_exit_per_start() {
        let (tx, mut rx) = mpsc::channel(8);
        let runner = runner_for(&["echo", "hello"], tx);
        let _handle = runner.start().unwrap();

        assert!(!expect_exit(&mut rx).await, "exit was not requested");
        // No duplicate event follows.
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_output_pumped_into_ring() {
        let (tx, mut rx) = mpsc::channel(8);
        let runner = runner_for(&["echo", "ring-payload"], tx);
        let handle = runner.start().unwrap();

        expect_exit(&mut rx).await;
        assert!(ring_contains(&handle, b"ring-payload").await);
    }

    #[tokio::test]
    async fn test_write_stdin_and_graceful_kill() {
        let (tx, mut rx) = mpsc::channel(8);
        let runner = runner_for(&["cat"], tx);
        let handle = runner.start().unwrap();

        handle.write_stdin(b"ping\n").unwrap();
        // The PTY echoes input, so the ring sees it even before cat does.
        assert!(ring_contains(&handle, b"ping").await);

        handle.kill_graceful();
        assert!(expect_exit(&mut rx).await, "exit was requested");
        assert!(handle.has_exited());
    }

    #[tokio::test]
    async fn test_kill_graceful_idempotent() {
        let (tx, mut rx) = mpsc::channel(8);
        let runner = runner_for(&["sleep", "30"], tx);
        let handle = runner.start().unwrap();

        handle.kill_graceful();
        handle.kill_graceful();

        assert!(expect_exit(&mut rx).await);
        // Still exactly one exit event.
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_hard_kill_escalation() {
        let (tx, mut rx) = mpsc::channel(8);
        let runner = runner_for(
            &["sh", "-c", "trap '' INT; while true; do sleep 0.05; done"],
            tx,
        );
        let handle = runner.start().unwrap();

        // Let the shell install its trap before asking it to die.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let asked = Instant::now();
        handle.kill_graceful();

        assert!(expect_exit(&mut rx).await);
        // SIGINT was ignored; only the deferred SIGKILL can have worked.
        assert!(asked.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_spawn_failure_returns_error() {
        let (tx, mut rx) = mpsc::channel(8);
        let runner = runner_for(&["/nonexistent/restarter-test-binary"], tx);
        assert!(runner.start().is_err());
        // A failed start emits nothing.
        assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let (tx, _rx) = mpsc::channel(8);
        let runner = ChildRunner::new(Vec::new(), 1024, Duration::from_millis(300), tx);
        assert!(runner.start().is_err());
    }
}

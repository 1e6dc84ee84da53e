//! Handle to a running supervised child

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portable_pty::ChildKiller;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use restarter_utils::{RestarterError, Result};

use crate::ringbuf::RingBuffer;

/// A running child process and its PTY plumbing
///
/// Created by [`ChildRunner::start`](crate::pty::ChildRunner::start) and
/// discarded when the supervisor observes the exit; handles are never
/// reused across restarts.
pub struct ChildHandle {
    /// Writer side of the PTY master (the child's stdin)
    writer: Mutex<Box<dyn Write + Send>>,
    /// SIGKILL delivery for the escalation path
    killer: Arc<Mutex<Box<dyn ChildKiller + Send + Sync>>>,
    pid: Option<u32>,
    ring: Arc<RingBuffer>,
    /// True iff termination was initiated by the supervisor
    kill_requested: Arc<AtomicBool>,
    /// Cancelled by the waiter once the child has exited
    exited: CancellationToken,
    hard_kill_delay: Duration,
}

impl ChildHandle {
    pub(super) fn new(
        writer: Box<dyn Write + Send>,
        killer: Box<dyn ChildKiller + Send + Sync>,
        pid: Option<u32>,
        ring: Arc<RingBuffer>,
        kill_requested: Arc<AtomicBool>,
        exited: CancellationToken,
        hard_kill_delay: Duration,
    ) -> Self {
        Self {
            writer: Mutex::new(writer),
            killer: Arc::new(Mutex::new(killer)),
            pid,
            ring,
            kill_requested,
            exited,
            hard_kill_delay,
        }
    }

    /// The child's merged output history
    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Whether the waiter has observed the exit
    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Write the full buffer to the child's stdin
    pub fn write_stdin(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| RestarterError::pty(format!("stdin write failed: {}", e)))
    }

    /// Request graceful termination: SIGINT now, SIGKILL after the hard-kill
    /// delay if the child is still alive
    ///
    /// Idempotent; calls after the first are no-ops.
    pub fn kill_graceful(&self) {
        if self.kill_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        let delivered = match self.pid {
            Some(pid) => {
                info!(pid, "sending SIGINT to child");
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
                if rc != 0 {
                    warn!(pid, "failed to deliver SIGINT");
                }
                rc == 0
            }
            None => {
                warn!("child pid unknown, cannot deliver SIGINT");
                false
            }
        };

        if !delivered {
            if let Err(e) = self.killer.lock().kill() {
                warn!(error = %e, "failed to deliver SIGKILL");
            }
            return;
        }

        let exited = self.exited.clone();
        let killer = self.killer.clone();
        let delay = self.hard_kill_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = exited.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    warn!("child did not exit after SIGINT, sending SIGKILL");
                    if let Err(e) = killer.lock().kill() {
                        warn!(error = %e, "failed to deliver SIGKILL");
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildHandle")
            .field("pid", &self.pid)
            .field("kill_requested", &self.kill_requested.load(Ordering::SeqCst))
            .field("exited", &self.exited.is_cancelled())
            .finish_non_exhaustive()
    }
}

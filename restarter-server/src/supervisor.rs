//! Lifecycle policy for the supervised child
//!
//! A single-task event loop owning all supervision state: the set of live
//! forwarded sessions, the attach flag, the child handle, and the idle
//! deadline. Every event source (gateway logins, the attach console, the
//! child waiter) feeds one bounded channel, so ordering between attach
//! signalling, history replay, and passthrough input is inherited from
//! channel FIFO rather than enforced by locks.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::attach::{restore_cooked, ConsoleHandle};
use crate::pty::{ChildHandle, ChildRunner};

/// Everything the supervisor reacts to
#[derive(Debug)]
pub enum Event {
    /// A forward bridge came up (`up = true`, once) or went down
    /// (`up = false`, once or twice per bridge)
    Login { up: bool, id: String },
    /// The operator attached the local terminal; `residue` is input that
    /// followed the sigil newline and belongs to the child
    Attached { residue: Vec<u8> },
    /// Attached-mode keystrokes bound for the child's stdin
    Input(Vec<u8>),
    /// The operator detached (hotkey, stdin error, or synthetic)
    Detached,
    /// The child process exited; expected iff termination was requested
    ChildExited { kill_requested: bool },
}

/// Owns the when-should-the-child-run decision
pub struct Supervisor {
    sessions: HashSet<String>,
    attached: bool,
    child: Option<ChildHandle>,
    runner: ChildRunner,
    console: ConsoleHandle,
    idle_timeout: Duration,
    idle_deadline: Option<Instant>,
    events: mpsc::Receiver<Event>,
}

impl Supervisor {
    pub fn new(
        runner: ChildRunner,
        console: ConsoleHandle,
        idle_timeout: Duration,
        events: mpsc::Receiver<Event>,
    ) -> Self {
        Self {
            sessions: HashSet::new(),
            attached: false,
            child: None,
            runner,
            console,
            idle_timeout,
            idle_deadline: None,
            events,
        }
    }

    /// Run the event loop until every event source is gone
    pub async fn run(mut self) {
        // Eager boot: start the child once at startup with the idle timer
        // armed, so an unused server still winds down after the timeout.
        self.start_child();
        self.reconcile();

        loop {
            tokio::select! {
                maybe = self.events.recv() => match maybe {
                    Some(ev) => self.handle_event(ev),
                    None => {
                        debug!("event channel closed, supervisor exiting");
                        break;
                    }
                },
                _ = idle_wait(self.idle_deadline) => self.on_idle_timeout(),
            }
        }
    }

    fn handle_event(&mut self, ev: Event) {
        match ev {
            Event::Login { up: true, id } => {
                self.sessions.insert(id);
                info!(sessions = self.sessions.len(), "forward connected");
                self.reconcile();
            }
            Event::Login { up: false, id } => {
                // Both bridge halves report down; removal is idempotent.
                self.sessions.remove(&id);
                info!(sessions = self.sessions.len(), "forward disconnected");
                self.reconcile();
            }
            Event::Attached { residue } => {
                self.attached = true;
                self.reconcile();
                match &self.child {
                    Some(child) => {
                        // History replay must land on stdout before any
                        // operator input reaches the child.
                        child.ring().dump_and_attach(Box::new(std::io::stdout()));
                        if !residue.is_empty() {
                            if let Err(e) = child.write_stdin(&residue) {
                                warn!(error = %e, "failed forwarding input to child");
                            }
                        }
                    }
                    None => warn!("attach requested but child is not running"),
                }
            }
            Event::Input(bytes) => match &self.child {
                Some(child) => {
                    if let Err(e) = child.write_stdin(&bytes) {
                        warn!(error = %e, "failed forwarding input to child");
                    }
                }
                None => debug!("dropping attached-mode input, child not running"),
            },
            Event::Detached => {
                self.attached = false;
                if let Some(child) = &self.child {
                    child.ring().detach();
                }
                self.reconcile();
            }
            Event::ChildExited { kill_requested } => {
                if kill_requested {
                    info!("child exited after requested termination");
                } else {
                    warn!("child exited unexpectedly");
                }
                if self.attached {
                    // The waiter restored the terminal; the console scanner
                    // must follow, or the next stdin byte would still be
                    // scanned for the detach hotkey.
                    self.console.force_detach();
                    restore_cooked();
                    self.attached = false;
                }
                self.child = None;
                self.reconcile();
            }
        }
    }

    /// Re-establish both invariants: the child runs iff someone needs it,
    /// and the idle timer is armed iff nobody does
    fn reconcile(&mut self) {
        let busy = !self.sessions.is_empty() || self.attached;
        if busy {
            self.idle_deadline = None;
            if self.child.is_none() {
                self.start_child();
            }
        } else {
            self.idle_deadline = Some(Instant::now() + self.idle_timeout);
        }
    }

    fn start_child(&mut self) {
        match self.runner.start() {
            Ok(handle) => self.child = Some(handle),
            Err(e) => {
                // Leave the slot empty; the next event retries the spawn,
                // so no busy loop can form.
                warn!(error = %e, "failed to start child");
            }
        }
    }

    fn on_idle_timeout(&mut self) {
        match &self.child {
            Some(child) => {
                info!("idle timeout reached, stopping child");
                child.kill_graceful();
                // Wait for ChildExited; the termination is never cancelled.
                self.idle_deadline = None;
            }
            None => {
                self.idle_deadline = Some(Instant::now() + self.idle_timeout);
            }
        }
    }

    #[cfg(test)]
    fn child_running(&self) -> bool {
        self.child.is_some()
    }
}

async fn idle_wait(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

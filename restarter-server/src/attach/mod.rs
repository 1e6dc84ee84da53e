//! Local attach console
//!
//! Lets an operator on the host's stdin join the child's PTY: typing the
//! `term` sigil attaches the terminal (raw mode, history replay, live
//! output), Ctrl+A detaches without touching the child. While detached,
//! stdin is just a line-oriented prompt waiting for the sigil.

mod scanner;

pub use scanner::{AttachAction, InputScanner};

use std::sync::Arc;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, is_raw_mode_enabled};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::supervisor::Event;

/// Supervisor-side handle to the console
///
/// Used to route a synthetic detach into the scanner when the child exits
/// while the operator is attached.
#[derive(Clone)]
pub struct ConsoleHandle {
    scanner: Arc<Mutex<InputScanner>>,
}

impl ConsoleHandle {
    pub fn force_detach(&self) {
        self.scanner.lock().force_detach();
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.scanner.lock().is_attached()
    }

    /// Handle backed by a fresh scanner, not wired to any stdin task
    #[cfg(test)]
    pub(crate) fn standalone() -> Self {
        Self {
            scanner: Arc::new(Mutex::new(InputScanner::new())),
        }
    }

    /// Drive the scanner as if the operator had typed the sigil
    #[cfg(test)]
    pub(crate) fn simulate_attach(&self) {
        self.scanner.lock().feed(b"term\n");
    }
}

/// Host-stdin reader driving the attach state machine
pub struct AttachConsole;

impl AttachConsole {
    /// Spawn the stdin reader task; events flow into the supervisor channel
    pub fn spawn(events: mpsc::Sender<Event>) -> ConsoleHandle {
        let scanner = Arc::new(Mutex::new(InputScanner::new()));
        let handle = ConsoleHandle {
            scanner: scanner.clone(),
        };
        tokio::spawn(run_console(scanner, events));
        handle
    }
}

async fn run_console(scanner: Arc<Mutex<InputScanner>>, events: mpsc::Sender<Event>) {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 1024];

    info!("in detached mode, type 'term' and press enter to attach");

    loop {
        match stdin.read(&mut buf).await {
            Ok(0) => {
                if scanner.lock().is_attached() {
                    scanner.lock().force_detach();
                    restore_cooked();
                    let _ = events.send(Event::Detached).await;
                }
                debug!("stdin closed, console exiting");
                break;
            }
            Ok(n) => {
                let actions = scanner.lock().feed(&buf[..n]);
                for action in actions {
                    match action {
                        AttachAction::Attach { residue } => {
                            if let Err(e) = enable_raw_mode() {
                                warn!(error = %e, "failed to enter raw mode, attach aborted");
                                scanner.lock().force_detach();
                                continue;
                            }
                            info!("terminal attached, press ctrl-a to detach");
                            if events.send(Event::Attached { residue }).await.is_err() {
                                return;
                            }
                        }
                        AttachAction::Forward(bytes) => {
                            if events.send(Event::Input(bytes)).await.is_err() {
                                return;
                            }
                        }
                        AttachAction::Detach => {
                            restore_cooked();
                            info!("terminal detached");
                            if events.send(Event::Detached).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                if scanner.lock().is_attached() {
                    scanner.lock().force_detach();
                    restore_cooked();
                    warn!(error = %e, "stdin error, terminal detached");
                    let _ = events.send(Event::Detached).await;
                } else {
                    warn!(error = %e, "stdin error, console exiting");
                }
                break;
            }
        }
    }
}

/// Put the host terminal back into cooked mode if it is currently raw
///
/// Safe to call from any exit path; does nothing when the terminal is
/// already cooked or when stdin is not a terminal.
pub(crate) fn restore_cooked() {
    if let Ok(true) = is_raw_mode_enabled() {
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_force_detach() {
        let scanner = Arc::new(Mutex::new(InputScanner::new()));
        let handle = ConsoleHandle {
            scanner: scanner.clone(),
        };
        scanner.lock().feed(b"term\n");
        assert!(handle.is_attached());
        handle.force_detach();
        assert!(!handle.is_attached());
    }

    #[test]
    fn test_restore_cooked_outside_terminal() {
        // Not a TTY in the test environment; must not panic either way.
        restore_cooked();
    }
}

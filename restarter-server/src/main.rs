//! ssh-restarter - SSH-gated lifecycle supervisor
//!
//! Keeps one long-running child process (typically a game server) alive
//! exactly while someone is using it: forwarded SSH clients and a local
//! attach console count as use, an idle timeout reclaims the machine in
//! between, and the next forward brings the child back up.

mod attach;
mod config;
mod gateway;
mod pty;
mod ringbuf;
mod supervisor;

use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;

use restarter_utils::Result;

use crate::attach::AttachConsole;
use crate::config::{Cli, ServerConfig, CHILD_HISTORY_BYTES};
use crate::pty::ChildRunner;
use crate::supervisor::Supervisor;

/// Capacity of the supervisor's event channel
const EVENT_CHANNEL_SIZE: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("ssh-restarter: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> Result<()> {
    restarter_utils::init_logging()?;
    let cfg = ServerConfig::from_cli(cli)?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

    let runner = ChildRunner::new(
        cfg.command.clone(),
        CHILD_HISTORY_BYTES,
        cfg.hard_kill_delay,
        events_tx.clone(),
    );
    let console = AttachConsole::spawn(events_tx.clone());
    let supervisor = Supervisor::new(runner, console, cfg.idle_timeout, events_rx);
    tokio::spawn(supervisor.run());

    gateway::run(&cfg, events_tx).await
}

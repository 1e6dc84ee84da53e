//! CLI flags and runtime configuration
//!
//! Flag spellings keep the underscore form (`--ssh_port`) for compatibility
//! with existing deployments. The resolved [`ServerConfig`] carries every
//! timing knob explicitly so tests can shrink the production delays.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use restarter_utils::{RestarterError, Result};

/// Environment variable consulted for the password hash when `--pwd` is empty
pub const PWD_ENV_VAR: &str = "SSH_RESTARTER_PWD";

/// Fixed interval between inner dial attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Grace period between SIGINT and SIGKILL
pub const HARD_KILL_DELAY: Duration = Duration::from_secs(5);

/// History window for the child's merged output
pub const CHILD_HISTORY_BYTES: usize = 2048;

#[derive(Parser, Debug)]
#[command(name = "ssh-restarter")]
#[command(about = "SSH-gated lifecycle supervisor for a single child process")]
#[command(version)]
pub struct Cli {
    /// Port for the SSH gateway to listen on
    #[arg(long = "ssh_port", default_value_t = 22)]
    pub ssh_port: u16,

    /// Only accepted destination port for local forwards
    #[arg(long = "fwd_port", default_value_t = 25565)]
    pub fwd_port: u16,

    /// Path to the SSH host private key
    #[arg(long, default_value = "/etc/ssh/ssh_host_rsa")]
    pub hostkey: PathBuf,

    /// bcrypt hash of the gateway password
    ///
    /// Falls back to the SSH_RESTARTER_PWD environment variable when empty.
    #[arg(long, default_value = "")]
    pub pwd: String,

    /// Seconds with no forwards and no attached console before the child is
    /// terminated
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,

    /// Maximum number of 5s dial retries while the child comes up
    #[arg(long, default_value_t = 20)]
    pub retries: u32,

    /// Command to supervise
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub ssh_port: u16,
    pub fwd_port: u16,
    pub hostkey: PathBuf,
    pub password_hash: String,
    pub idle_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub hard_kill_delay: Duration,
    pub command: Vec<String>,
}

impl ServerConfig {
    /// Resolve the parsed flags, pulling the password hash from the
    /// environment when the flag was left empty
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let password_hash = if !cli.pwd.is_empty() {
            cli.pwd
        } else {
            std::env::var(PWD_ENV_VAR)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    RestarterError::config(format!(
                        "gateway password hash provided neither via --pwd nor {}",
                        PWD_ENV_VAR
                    ))
                })?
        };

        Ok(Self {
            ssh_port: cli.ssh_port,
            fwd_port: cli.fwd_port,
            hostkey: cli.hostkey,
            password_hash,
            idle_timeout: Duration::from_secs(cli.timeout),
            max_retries: cli.retries,
            retry_delay: RETRY_DELAY,
            hard_kill_delay: HARD_KILL_DELAY,
            command: cli.command,
        })
    }
}

//! Error types for ssh-restarter
//!
//! Provides a unified error type used across the restarter crates.

use std::path::PathBuf;

/// Main error type for restarter operations
#[derive(Debug, thiserror::Error)]
pub enum RestarterError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load host key {path}: {message}")]
    HostKey { path: PathBuf, message: String },

    // === Child Process Errors ===

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    // === Gateway Errors ===

    #[error("Dial to {addr} failed after {attempts} attempts")]
    DialExhausted { addr: String, attempts: u32 },

    #[error("SSH error: {0}")]
    Ssh(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RestarterError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a PTY error
    pub fn pty(msg: impl Into<String>) -> Self {
        Self::Pty(msg.into())
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::ProcessSpawn(msg.into())
    }

    /// Create an SSH error
    pub fn ssh(msg: impl Into<String>) -> Self {
        Self::Ssh(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using RestarterError
pub type Result<T> = std::result::Result<T, RestarterError>;

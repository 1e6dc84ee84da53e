//! restarter-utils: Common infrastructure shared across the ssh-restarter crates
//!
//! This crate provides:
//! - Unified error types ([`RestarterError`], [`Result`])
//! - Logging setup ([`init_logging`], [`init_logging_with_filter`])

pub mod error;
pub mod logging;

// Re-export main types at crate root for convenience
pub use error::{RestarterError, Result};
pub use logging::{init_logging, init_logging_with_filter, LOG_ENV_VAR};

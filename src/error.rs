//! Error types for the gateway
//!
//! # Error Recovery Strategies
//!
//! ## Fatal Errors (Exit 1)
//!
//! - **`Io`** during ingress startup: the UDP bind failed, usually because the
//!   port is taken or privileges are missing. Surfaced to the launcher.
//!
//! ## Transient Errors (Retry)
//!
//! - **`Handshake`**: the FNE rejected a login step or a 5-second wait timed
//!   out. The session closes its socket and the reconnection supervisor tries
//!   again after the reconnect interval.
//!
//! ## Configuration Errors (Continue with Defaults)
//!
//! - **`Config`**: the configuration file is missing or malformed. The
//!   gateway logs the problem and runs with documented defaults.
//!
//! ## Internal Errors
//!
//! - **`MutexPoisoned`** / **`ThreadPanic`**: a worker thread panicked. The
//!   affected component exits its loop gracefully rather than propagating the
//!   panic across the process.

use thiserror::Error;

/// Errors that can occur in the gateway
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Mutex poisoned")]
    MutexPoisoned,

    #[error("Thread panic")]
    ThreadPanic,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

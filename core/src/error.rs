//! Error types for Shelly

use thiserror::Error;

use crate::hooks::HookError;
use crate::ipc::IpcError;
use crate::validation::ValidationError;

/// Core error type for Shelly operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Malformed or missing input, rejected before any side effect.
    #[error("{0}")]
    Validation(String),

    /// A state precondition does not hold (not connected, already serving, ...).
    #[error("{0}")]
    Precondition(String),

    #[error("Not connected. Call connect first")]
    NotConnected,

    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("{0}")]
    Hook(#[from] HookError),

    #[error("{0}")]
    Ipc(#[from] IpcError),

    #[error("Daemon failed to start")]
    DaemonStartFailed,

    #[error("Seed mismatch on import")]
    SeedMismatch,

    #[error("{0}")]
    Other(String),
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e.to_string())
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

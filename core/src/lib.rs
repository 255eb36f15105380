//! Shelly Core - per-seed remote shell sessions
//!
//! This crate provides:
//! - Persisted per-seed context records (SQLite)
//! - The daemon wire protocol and IPC client
//! - Daemon supervision and liveness probes
//! - A named-event hook pipeline with built-in plugins
//! - The session coordinator behind every CLI command
//! - A multi-session manager for interactive use

pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod hooks;
pub mod ipc;
pub mod manager;
pub mod paths;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod store;
pub mod supervisor;
pub mod tunnel;
pub mod types;
pub mod validation;

pub use config::Config;
pub use coordinator::{SessionCommand, SessionCoordinator};
pub use error::{Error, Result};
pub use health::HealthMonitor;
pub use hooks::{HookError, HookPipeline, Plugin};
pub use ipc::{IpcClient, IpcError};
pub use manager::{ConnectOptions, SessionManager};
pub use paths::{seed_hash, Paths};
pub use protocol::{IpcMessage, IpcResponse};
pub use registry::SessionRegistry;
pub use store::ContextStore;
pub use supervisor::DaemonSupervisor;
pub use types::*;

/// Re-export commonly used items
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{SessionCommand, SessionCoordinator};
    pub use crate::error::{Error, Result};
    pub use crate::hooks::{HookPipeline, Payload, Plugin};
    pub use crate::ipc::{IpcClient, IpcError};
    pub use crate::paths::Paths;
    pub use crate::protocol::{IpcMessage, IpcResponse};
    pub use crate::types::*;
}

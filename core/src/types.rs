//! Core data types for Shelly
//!
//! These types are shared between the daemon, the CLI and the coordinator.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The last command run against a seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastCommand {
    pub name: String,
    pub args: Value,
    pub at: DateTime<Utc>,
}

/// Persisted per-seed connection and serving state.
///
/// `connected` (acting as a tunnel client) and `serving` (acting as a tunnel
/// endpoint) are tracked independently. Neither is trusted without a live
/// probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedContext {
    pub seed: String,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub hyperssh_seed: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub serving: bool,
    #[serde(default)]
    pub server_port: Option<u16>,
    #[serde(default)]
    pub server_pid: Option<u32>,
    #[serde(default)]
    pub daemon_pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_cmd: Option<LastCommand>,
}

impl SeedContext {
    /// A fresh, idle context.
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            connected: false,
            hyperssh_seed: None,
            user: None,
            serving: false,
            server_port: None,
            server_pid: None,
            daemon_pid: None,
            created_at: Utc::now(),
            connected_at: None,
            last_cmd: None,
        }
    }

    /// Drop back to the disconnected baseline.
    pub fn reset_connection(&mut self) {
        self.connected = false;
        self.hyperssh_seed = None;
        self.user = None;
        self.daemon_pid = None;
        self.connected_at = None;
    }

    /// Drop back to the not-serving baseline.
    pub fn reset_serving(&mut self) {
        self.serving = false;
        self.server_port = None;
        self.server_pid = None;
    }

    pub fn record_command(&mut self, name: &str, args: Value) {
        self.last_cmd = Some(LastCommand {
            name: name.to_string(),
            args,
            at: Utc::now(),
        });
    }
}

/// A daemon this client knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonHandle {
    /// Only known when this client spawned the daemon
    pub pid: Option<u32>,
    pub endpoint: PathBuf,
    pub seed: String,
    pub user: String,
}

/// Severity of a log ring entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// An entry of the bounded in-memory log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub msg: String,
    pub session: Option<String>,
}

/// Lifecycle state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        }
    }
}

/// A session tracked by the in-memory registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub seed: String,
    pub user: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub errors: Vec<String>,
}

/// Outcome of a coordinator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Structured result of a coordinator operation.
///
/// Serialized as a flat JSON object; absent fields are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub status: Status,
    pub seed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperssh_seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_with: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cmd: Option<LastCommand>,
}

impl CommandResult {
    pub fn success(seed: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::empty(Status::Success, seed.into())
        }
    }

    /// Error result carrying the failing operation's name.
    pub fn failure(seed: impl Into<String>, command: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            command: Some(command.to_string()),
            ..Self::empty(Status::Error, seed.into())
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    fn empty(status: Status, seed: String) -> Self {
        Self {
            status,
            seed,
            message: None,
            error: None,
            command: None,
            output: None,
            data: None,
            user: None,
            hyperssh_seed: None,
            connected: None,
            connected_at: None,
            serving: None,
            port: None,
            pid: None,
            server_port: None,
            server_pid: None,
            connect_with: None,
            warning: None,
            created_at: None,
            last_cmd: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_uses_persisted_field_names() {
        let mut ctx = SeedContext::new("abc");
        ctx.connected = true;
        ctx.hyperssh_seed = Some("abc-remote".to_string());
        ctx.server_port = Some(9001);

        let value = serde_json::to_value(&ctx).unwrap();
        for key in [
            "seed",
            "connected",
            "hypersshSeed",
            "user",
            "serving",
            "serverPort",
            "serverPid",
            "createdAt",
            "lastCmd",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_context_tolerates_missing_optional_fields() {
        let ctx: SeedContext = serde_json::from_value(json!({
            "seed": "abc",
            "createdAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(!ctx.connected);
        assert!(!ctx.serving);
        assert!(ctx.last_cmd.is_none());
    }

    #[test]
    fn test_resets_return_to_baseline() {
        let mut ctx = SeedContext::new("abc");
        ctx.connected = true;
        ctx.user = Some("alice".to_string());
        ctx.daemon_pid = Some(42);
        ctx.serving = true;
        ctx.server_pid = Some(43);
        ctx.server_port = Some(9000);

        ctx.reset_connection();
        assert!(!ctx.connected);
        assert!(ctx.user.is_none());
        assert!(ctx.daemon_pid.is_none());
        assert!(ctx.serving, "serving is tracked independently");

        ctx.reset_serving();
        assert!(!ctx.serving);
        assert!(ctx.server_pid.is_none());
    }

    #[test]
    fn test_command_result_serialization_omits_empty_fields() {
        let result = CommandResult::failure("abc", "send", "Not connected. Call connect first");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "status": "error",
                "seed": "abc",
                "error": "Not connected. Call connect first",
                "command": "send"
            })
        );
        assert!(!result.is_success());
    }
}

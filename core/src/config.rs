//! Configuration loaded from `<home>/config.toml`
//!
//! Every field is optional; a missing file yields the defaults. Delay values
//! are tunable rather than load-bearing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Connection-loss signatures in remote-shell error text.
pub const DEFAULT_FATAL_PATTERNS: &[&str] = &[
    r"(?i)connection reset",
    r"(?i)connection refused",
    r"(?i)broken pipe",
    r"EPIPE",
    r"ECONNREFUSED",
    r"ECONNRESET",
    r"ETIMEDOUT",
    r"(?i)timed out",
    r"kex_exchange_identification",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub remote_shell: ToolConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
}

impl Config {
    /// Load `config.toml` from `home`, falling back to defaults if absent.
    ///
    /// # Errors
    /// Returns `Error::Config` if the file exists but cannot be parsed.
    pub fn load(home: &Path) -> Result<Self> {
        let path = home.join("config.toml");
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Timeouts and behavior of the daemon and its supervisor.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Path to the `shellyd` binary (default: next to the current executable)
    pub binary: Option<PathBuf>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_spawn_poll_interval_ms")]
    pub spawn_poll_interval_ms: u64,
    #[serde(default = "default_spawn_poll_attempts")]
    pub spawn_poll_attempts: u32,
    #[serde(default = "default_shutdown_settle_ms")]
    pub shutdown_settle_ms: u64,
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
    #[serde(default = "default_fatal_patterns")]
    pub fatal_patterns: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            binary: None,
            request_timeout_ms: default_request_timeout_ms(),
            exec_timeout_ms: default_exec_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            spawn_poll_interval_ms: default_spawn_poll_interval_ms(),
            spawn_poll_attempts: default_spawn_poll_attempts(),
            shutdown_settle_ms: default_shutdown_settle_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            fatal_patterns: default_fatal_patterns(),
        }
    }
}

impl DaemonConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn spawn_poll_interval(&self) -> Duration {
        Duration::from_millis(self.spawn_poll_interval_ms)
    }

    pub fn shutdown_settle(&self) -> Duration {
        Duration::from_millis(self.shutdown_settle_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

/// An external tool: program plus leading arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_remote_shell_args")]
    pub args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_remote_shell_args(),
        }
    }
}

/// Tunnel-server tool and port selection.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_tunnel_args")]
    pub args: Vec<String>,
    /// First port of the range picked from when `serve` gets no port
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_port_span")]
    pub port_span: u16,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        default_tunnel_tool()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Maximum entries kept in the in-memory log ring
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginsConfig {
    /// Built-in plugin names to leave unloaded
    #[serde(default)]
    pub disabled: Vec<String>,
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_exec_timeout_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_spawn_poll_interval_ms() -> u64 {
    100
}

fn default_spawn_poll_attempts() -> u32 {
    50
}

fn default_shutdown_settle_ms() -> u64 {
    300
}

fn default_drain_grace_ms() -> u64 {
    100
}

fn default_fatal_patterns() -> Vec<String> {
    DEFAULT_FATAL_PATTERNS.iter().map(|p| p.to_string()).collect()
}

fn default_program() -> String {
    "npx".to_string()
}

fn default_remote_shell_args() -> Vec<String> {
    vec!["hyperssh".to_string()]
}

fn default_tunnel_args() -> Vec<String> {
    vec!["hypertele-server".to_string()]
}

fn default_base_port() -> u16 {
    9000
}

fn default_port_span() -> u16 {
    1000
}

fn default_tunnel_tool() -> TunnelConfig {
    TunnelConfig {
        program: default_program(),
        args: default_tunnel_args(),
        base_port: default_base_port(),
        port_span: default_port_span(),
    }
}

fn default_max_entries() -> usize {
    10_000
}

//! Launching and stopping the tunnel-server tool behind `serve`

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, info};

use crate::config::TunnelConfig;
use crate::error::{Error, Result};
use crate::health::reap_in_background;
use crate::paths::{seed_hash, Paths};

#[derive(Debug, Clone)]
pub struct TunnelLauncher {
    paths: Paths,
    config: TunnelConfig,
}

impl TunnelLauncher {
    pub fn new(paths: Paths, config: TunnelConfig) -> Self {
        Self { paths, config }
    }

    /// A port in `[base_port, base_port + port_span)`.
    pub fn pick_port(&self) -> u16 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let span = u32::from(self.config.port_span.max(1));
        let offset = (nanos % span) as u16;
        self.config.base_port.saturating_add(offset)
    }

    /// Start the tunnel server for `seed` on `port`; returns its pid.
    ///
    /// The tool runs as the leader of its own process group so `stop` can
    /// signal it together with anything it forks.
    pub fn start(&self, seed: &str, port: u16) -> Result<u32> {
        self.paths.ensure_dirs()?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.paths.tunnel_log(seed))?;
        let err_file = log_file.try_clone()?;

        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg("-l")
            .arg(port.to_string())
            .arg("--seed")
            .arg(seed_hash(seed))
            .arg("--private")
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(err_file))
            .process_group(0)
            .spawn()
            .map_err(|e| {
                Error::Other(format!(
                    "Failed to start tunnel server {}: {}",
                    self.config.program, e
                ))
            })?;

        let pid = child.id();
        info!("Tunnel server pid {} listening on port {}", pid, port);
        reap_in_background(child);
        Ok(pid)
    }

    /// SIGTERM the tunnel's process group. Failures mean it is already gone.
    pub fn stop(&self, pid: u32) {
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        if raw <= 0 {
            return;
        }
        if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGTERM) {
            debug!("Signal to process group {} failed: {}", pid, e);
        }
    }
}

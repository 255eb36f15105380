//! Spawning and stopping per-seed daemons

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::error::{Error, Result};
use crate::health::reap_in_background;
use crate::ipc::IpcClient;
use crate::paths::{remove_file_best_effort, Paths};
use crate::types::DaemonHandle;

/// Name of the daemon binary looked up next to the current executable
pub const DAEMON_BINARY: &str = "shellyd";

#[derive(Debug, Clone)]
pub struct DaemonSupervisor {
    paths: Paths,
    config: DaemonConfig,
}

impl DaemonSupervisor {
    pub fn new(paths: Paths, config: DaemonConfig) -> Self {
        Self { paths, config }
    }

    /// IPC client bound to a seed's endpoint with the configured timeout
    pub fn client(&self, seed: &str) -> IpcClient {
        IpcClient::new(self.paths.endpoint(seed)).with_timeout(self.config.request_timeout())
    }

    /// Make sure a daemon exists for `seed`.
    ///
    /// An existing endpoint file short-circuits (liveness is the health
    /// monitor's job). Otherwise a detached daemon is spawned and the endpoint
    /// polled for until it appears.
    ///
    /// # Errors
    /// `Error::DaemonStartFailed` if the endpoint never appears.
    pub async fn ensure_running(
        &self,
        seed: &str,
        user: &str,
        remote_seed: Option<&str>,
    ) -> Result<DaemonHandle> {
        let endpoint = self.paths.endpoint(seed);
        if endpoint.exists() {
            debug!("Endpoint {:?} present, not spawning", endpoint);
            return Ok(DaemonHandle {
                pid: None,
                endpoint,
                seed: seed.to_string(),
                user: user.to_string(),
            });
        }

        let pid = self.spawn(seed, user, remote_seed)?;
        info!("Spawned daemon for seed with pid {}", pid);

        for _ in 0..self.config.spawn_poll_attempts {
            if endpoint.exists() {
                return Ok(DaemonHandle {
                    pid: Some(pid),
                    endpoint,
                    seed: seed.to_string(),
                    user: user.to_string(),
                });
            }
            tokio::time::sleep(self.config.spawn_poll_interval()).await;
        }

        if endpoint.exists() {
            return Ok(DaemonHandle {
                pid: Some(pid),
                endpoint,
                seed: seed.to_string(),
                user: user.to_string(),
            });
        }

        warn!(
            "Daemon pid {} never created {:?}; see {:?}",
            pid,
            endpoint,
            self.paths.daemon_log(seed)
        );
        Err(Error::DaemonStartFailed)
    }

    /// Stop the seed's daemon.
    ///
    /// Sends `disconnect`, then after a settle delay removes a lingering
    /// endpoint file regardless of the outcome, so a wedged daemon cannot block
    /// future spawns.
    pub async fn stop(&self, seed: &str) {
        if let Err(e) = self.client(seed).disconnect().await {
            debug!("Disconnect request failed: {}", e);
        }

        tokio::time::sleep(self.config.shutdown_settle()).await;

        let endpoint = self.paths.endpoint(seed);
        if endpoint.exists() {
            warn!("Daemon left {:?} behind, removing", endpoint);
            remove_file_best_effort(&endpoint);
        }
    }

    fn daemon_binary(&self) -> Result<PathBuf> {
        if let Some(ref binary) = self.config.binary {
            return Ok(binary.clone());
        }

        std::env::current_exe()?
            .parent()
            .map(|p| p.join(DAEMON_BINARY))
            .ok_or_else(|| Error::Other("Could not determine executable directory".into()))
    }

    fn spawn(&self, seed: &str, user: &str, remote_seed: Option<&str>) -> Result<u32> {
        self.paths.ensure_dirs()?;

        let binary = self.daemon_binary()?;
        let log_path = self.paths.daemon_log(seed);
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let err_file = log_file.try_clone()?;

        let mut cmd = Command::new(&binary);
        cmd.arg("--home")
            .arg(self.paths.home())
            .arg("--seed")
            .arg(seed)
            .arg("--user")
            .arg(user);
        if let Some(remote_seed) = remote_seed {
            cmd.arg("--remote-seed").arg(remote_seed);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(err_file));

        // New session: the daemon must outlive this client and its terminal
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::Other(format!("Failed to start daemon {:?}: {}", binary, e)))?;

        let pid = child.id();
        reap_in_background(child);
        Ok(pid)
    }
}

//! Liveness probes for daemons and tunnel processes
//!
//! Probes never fail: every error resolves to `false` so callers can downgrade
//! stale state instead of propagating.

use std::process::Child;
use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::paths::Paths;

/// Default bound on a reachability probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct HealthMonitor {
    paths: Paths,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Whether the seed's daemon accepts connections.
    ///
    /// True only if a connect followed by a clean close from the daemon side
    /// completes within the probe timeout.
    pub async fn is_reachable(&self, seed: &str) -> bool {
        let endpoint = self.paths.endpoint(seed);
        if !endpoint.exists() {
            return false;
        }

        let probe = async {
            let mut stream = UnixStream::connect(&endpoint).await?;
            stream.shutdown().await?;
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(())
        };

        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Probe of {:?} failed: {}", endpoint, e);
                false
            }
            Err(_) => {
                debug!("Probe of {:?} timed out", endpoint);
                false
            }
        }
    }
}

/// Whether a process with this pid exists (signal-0 probe).
///
/// Pid 0 and values outside the signed range are treated as dead; signalling
/// them would address a process group instead.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    kill(Pid::from_raw(raw), None).is_ok()
}

/// Collect the exit status of a detached child so it does not linger as a
/// zombie while this process keeps running.
pub(crate) fn reap_in_background(mut child: Child) {
    std::thread::spawn(move || {
        let _ = child.wait();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::UnixListener;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_invalid_pids_are_dead() {
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(u32::MAX));
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = HealthMonitor::new(Paths::new(dir.path()));
        assert!(!monitor.is_reachable("abc").await);
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        // A regular file where the socket should be
        std::fs::write(paths.endpoint("abc"), b"").unwrap();

        let monitor = HealthMonitor::new(paths);
        assert!(!monitor.is_reachable("abc").await);
    }

    #[tokio::test]
    async fn test_listening_daemon_is_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let listener = UnixListener::bind(paths.endpoint("abc")).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = tokio::io::BufReader::new(stream);
            let mut line = String::new();
            // Probe sends nothing; EOF then close
            let n = reader.read_line(&mut line).await.unwrap();
            assert_eq!(n, 0);
        });

        let monitor = HealthMonitor::new(paths);
        assert!(monitor.is_reachable("abc").await);
    }

    #[tokio::test]
    async fn test_unresponsive_daemon_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let listener = UnixListener::bind(paths.endpoint("abc")).unwrap();

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let monitor =
            HealthMonitor::new(paths).with_probe_timeout(Duration::from_millis(100));
        assert!(!monitor.is_reachable("abc").await);
        server.abort();
    }
}

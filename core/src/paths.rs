//! Filesystem layout under the Shelly home directory
//!
//! Every per-seed resource is named after a hash of the seed so that
//! arbitrary seed strings (up to 1024 chars) map to short, safe file names.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "SHELLY_HOME";

/// Number of hex chars of the seed hash used in socket names.
///
/// Unix socket paths are limited to ~104 bytes, so the full digest is too long.
const ENDPOINT_HASH_LEN: usize = 16;

/// Full SHA-256 hex digest of a seed.
pub fn seed_hash(seed: &str) -> String {
    hex::encode(Sha256::digest(seed.as_bytes()))
}

/// Resolved locations of every file Shelly reads or writes.
#[derive(Debug, Clone)]
pub struct Paths {
    home: PathBuf,
}

impl Paths {
    /// Use an explicit home directory.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolve the home directory: `SHELLY_HOME`, then `~/.shelly`.
    pub fn resolve() -> Self {
        if let Ok(home) = std::env::var(HOME_ENV) {
            if !home.is_empty() {
                return Self::new(home);
            }
        }

        let home = dirs::home_dir()
            .map(|h| h.join(".shelly"))
            .unwrap_or_else(|| PathBuf::from("/tmp/.shelly"));
        Self::new(home)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Create the home and logs directories if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.home)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    /// Local channel endpoint (Unix socket) for a seed.
    pub fn endpoint(&self, seed: &str) -> PathBuf {
        let hash = seed_hash(seed);
        self.home
            .join(format!("daemon-{}.sock", &hash[..ENDPOINT_HASH_LEN]))
    }

    /// Pointer file naming the seed the CLI should default to.
    pub fn current_seed(&self) -> PathBuf {
        self.home.join("current-seed")
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn database(&self) -> PathBuf {
        self.home.join("contexts.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Log file receiving a daemon's stdout/stderr.
    pub fn daemon_log(&self, seed: &str) -> PathBuf {
        let hash = seed_hash(seed);
        self.logs_dir()
            .join(format!("daemon-{}.log", &hash[..ENDPOINT_HASH_LEN]))
    }

    pub fn tunnel_log(&self, seed: &str) -> PathBuf {
        let hash = seed_hash(seed);
        self.logs_dir()
            .join(format!("tunnel-{}.log", &hash[..ENDPOINT_HASH_LEN]))
    }

    /// Read the current-seed pointer, if any.
    pub fn read_current_seed(&self) -> Option<String> {
        std::fs::read_to_string(self.current_seed())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Point the CLI at `seed` for its next invocation.
    pub fn write_current_seed(&self, seed: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.home)?;
        std::fs::write(self.current_seed(), seed)
    }

    /// Remove the current-seed pointer if it still names `seed`.
    pub fn clear_current_seed(&self, seed: &str) {
        if self.read_current_seed().as_deref() == Some(seed) {
            remove_file_best_effort(&self.current_seed());
        }
    }
}

/// Best-effort removal of a file.
///
/// Cleanup is advisory: a missing file is fine and any other failure is
/// logged, never propagated. Returns whether the file is gone afterwards.
pub fn remove_file_best_effort(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {:?}", path);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Failed to remove {:?}: {}", path, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_deterministic_and_short() {
        let paths = Paths::new("/tmp/shelly-test");
        let long_seed = "x".repeat(1024);

        assert_eq!(paths.endpoint("abc"), paths.endpoint("abc"));
        assert_ne!(paths.endpoint("abc"), paths.endpoint("abd"));

        let endpoint = paths.endpoint(&long_seed);
        assert!(endpoint.to_str().unwrap().len() < 100);
        assert!(endpoint.to_str().unwrap().ends_with(".sock"));
    }

    #[test]
    fn test_seed_hash_is_sha256_hex() {
        let hash = seed_hash("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_current_seed_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());

        assert!(paths.read_current_seed().is_none());
        paths.write_current_seed("abc").unwrap();
        assert_eq!(paths.read_current_seed().as_deref(), Some("abc"));

        paths.clear_current_seed("other");
        assert_eq!(paths.read_current_seed().as_deref(), Some("abc"));

        paths.clear_current_seed("abc");
        assert!(paths.read_current_seed().is_none());
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        assert!(remove_file_best_effort(Path::new("/nonexistent/shelly.sock")));
    }
}

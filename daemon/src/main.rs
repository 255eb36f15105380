//! Shelly Daemon (shellyd)
//!
//! One background process per seed, providing:
//! - A local Unix socket endpoint at <home>/daemon-<hash>.sock
//! - Remote command execution through the configured remote-shell tool
//! - Self-termination when the remote connection is lost
//!
//! Architecture:
//! - One newline-delimited JSON request per connection (IpcMessage/IpcResponse)
//! - Connections are served one at a time
//! - Lifecycle: starting -> serving -> draining -> terminated

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

mod executor;
mod handlers;
mod server;

use executor::RemoteShell;
use handlers::Disposition;
use shelly_core::{seed_hash, Config, IpcResponse, Paths};

#[derive(Parser)]
#[command(name = "shellyd")]
#[command(about = "Per-seed Shelly daemon", version)]
struct Args {
    /// Shelly home directory (default: $SHELLY_HOME or ~/.shelly)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Seed this daemon serves
    #[arg(long)]
    seed: String,

    /// Remote user
    #[arg(long)]
    user: String,

    /// Seed passed to the remote-shell tool (default: sha256 of --seed)
    #[arg(long)]
    remote_seed: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Serving,
    Draining,
    Terminated,
}

/// Global state for the daemon.
pub struct DaemonState {
    start_time: Instant,
    phase: Mutex<Phase>,
    pub paths: Paths,
    pub seed: String,
    pub config: Config,
    pub shell: RemoteShell,
}

impl DaemonState {
    fn new(args: Args) -> Result<Self> {
        let paths = match args.home {
            Some(home) => Paths::new(home),
            None => Paths::resolve(),
        };
        paths.ensure_dirs()?;
        let config = Config::load(paths.home())?;

        let remote_seed = args.remote_seed.unwrap_or_else(|| seed_hash(&args.seed));
        let shell = RemoteShell::new(
            &config.remote_shell,
            remote_seed,
            args.user,
            config.daemon.exec_timeout(),
            &config.daemon.fatal_patterns,
        )?;

        Ok(Self {
            start_time: Instant::now(),
            phase: Mutex::new(Phase::Starting),
            paths,
            seed: args.seed,
            config,
            shell,
        })
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        debug!("Phase {:?} -> {:?}", *current, phase);
        *current = phase;
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.phase(), Phase::Draining | Phase::Terminated)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Path to this seed's endpoint.
    pub fn socket_path(&self) -> PathBuf {
        self.paths.endpoint(&self.seed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shellyd=info".parse()?),
        )
        .init();

    info!("Starting shellyd v{}", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(DaemonState::new(Args::parse())?);
    server::run(state).await
}

/// Serve a single connection: one request line, one response line.
///
/// Returns the disposition of the request; an empty connection (a health
/// probe) is closed without a response.
async fn handle_client(
    mut stream: tokio::net::UnixStream,
    state: &DaemonState,
) -> Result<Disposition> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let read = tokio::time::timeout(
        state.config.daemon.request_timeout(),
        reader.read_line(&mut line),
    )
    .await;
    let n = match read {
        Ok(result) => result?,
        Err(_) => {
            warn!("Client sent no request in time, closing");
            return Ok(Disposition::Continue);
        }
    };
    if n == 0 {
        debug!("Empty connection (probe)");
        return Ok(Disposition::Continue);
    }

    let (response, disposition) = match handlers::parse_request(&line) {
        Ok(msg) => handlers::handle_message(msg, state).await,
        Err(e) => {
            warn!("Invalid message: {}", e);
            (
                IpcResponse::error(format!("Invalid JSON: {}", e)),
                Disposition::Continue,
            )
        }
    };

    writer.write_all(response.to_line()?.as_bytes()).await?;
    writer.flush().await?;
    writer.shutdown().await?;

    Ok(disposition)
}

//! Unix socket server for the daemon

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, error, info};

use shelly_core::paths::remove_file_best_effort;

use crate::handlers::Disposition;
use crate::{handle_client, DaemonState, Phase};

/// Run the daemon server until a disconnect, a lost connection or a
/// termination signal, then drain.
pub async fn run(state: Arc<DaemonState>) -> Result<()> {
    let socket_path = state.socket_path();

    // Remove stale socket
    if socket_path.exists() {
        debug!("Removing stale endpoint {:?}", socket_path);
        remove_file_best_effort(&socket_path);
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Failed to bind {:?}", socket_path))?;
    state.set_phase(Phase::Serving);
    info!("Listening on {:?}", socket_path);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    // Accept connections, one at a time. A termination signal also cuts
    // short the request in flight.
    loop {
        tokio::select! {
            result = listener.accept() => {
                let stream = match result {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                };
                tokio::select! {
                    handled = handle_client(stream, &state) => match handled {
                        Ok(Disposition::Drain) => break,
                        Ok(Disposition::Continue) => {}
                        Err(e) => error!("Client error: {}", e),
                    },
                    name = termination(&mut sigterm, &mut sigint, &mut sighup) => {
                        info!("Received {} during a request, shutting down", name);
                        break;
                    }
                }
            }
            name = termination(&mut sigterm, &mut sigint, &mut sighup) => {
                info!("Received {}, shutting down", name);
                break;
            }
        }
    }

    drain(&state, listener).await;
    Ok(())
}

/// Resolves on SIGTERM or SIGINT with the signal's name. SIGHUP is ignored.
async fn termination(
    sigterm: &mut Signal,
    sigint: &mut Signal,
    sighup: &mut Signal,
) -> &'static str {
    loop {
        tokio::select! {
            _ = sigterm.recv() => return "SIGTERM",
            _ = sigint.recv() => return "SIGINT",
            _ = sighup.recv() => debug!("Ignoring SIGHUP"),
        }
    }
}

/// Release the endpoint and the current-seed pointer, then let in-flight
/// writes settle before exiting.
async fn drain(state: &DaemonState, listener: UnixListener) {
    state.set_phase(Phase::Draining);
    drop(listener);

    remove_file_best_effort(&state.socket_path());
    state.paths.clear_current_seed(&state.seed);

    tokio::time::sleep(state.config.daemon.drain_grace()).await;
    state.set_phase(Phase::Terminated);
    info!("Daemon stopped after {}s", state.uptime_secs());
}

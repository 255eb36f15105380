//! Message handlers for the daemon

use tracing::{debug, info, warn};

use shelly_core::{IpcMessage, IpcResponse};

use crate::DaemonState;

/// What the server loop does after responding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Drain,
}

/// Parse one request line.
pub fn parse_request(line: &str) -> Result<IpcMessage, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Handle an incoming IPC message
pub async fn handle_message(msg: IpcMessage, state: &DaemonState) -> (IpcResponse, Disposition) {
    match msg {
        IpcMessage::Send { text } => {
            debug!("Send: {} bytes", text.len());

            if state.is_draining() {
                return (
                    IpcResponse::output("ERROR: Daemon shutting down\n"),
                    Disposition::Continue,
                );
            }

            let outcome = state.shell.run(&text).await;
            if outcome.connection_lost {
                warn!("Remote connection lost, shutting down");
                (IpcResponse::output(outcome.output), Disposition::Drain)
            } else {
                (IpcResponse::output(outcome.output), Disposition::Continue)
            }
        }

        IpcMessage::Disconnect => {
            info!("Disconnect requested via IPC");
            (IpcResponse::ok(), Disposition::Drain)
        }

        IpcMessage::Unknown => {
            debug!("Unknown message type");
            (IpcResponse::error("Unknown command"), Disposition::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        assert_eq!(
            parse_request("{\"type\":\"send\",\"text\":\"ls\"}\n").unwrap(),
            IpcMessage::Send {
                text: "ls".to_string()
            }
        );
        assert_eq!(
            parse_request("{\"type\":\"reboot\"}").unwrap(),
            IpcMessage::Unknown
        );
        assert!(parse_request("not json").is_err());
    }
}

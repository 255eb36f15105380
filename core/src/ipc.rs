//! IPC client for communicating with a seed's daemon
//!
//! One logical request is one physical connection: connect, write the request
//! line, read until a newline-terminated response arrives, close. The protocol
//! has no multiplexing, so concurrent callers against the same seed must
//! serialize themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::{IpcMessage, IpcResponse};

/// Default overall request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Error type for IPC operations
#[derive(Debug)]
pub enum IpcError {
    /// Endpoint file doesn't exist or the connection was refused
    DaemonNotRunning,
    /// Socket connection failed
    ConnectionFailed(std::io::Error),
    /// Failed to send message
    SendFailed(std::io::Error),
    /// Failed to receive response
    ReceiveFailed(std::io::Error),
    /// No response within the request timeout
    Timeout(Duration),
    /// Response was not valid JSON; carries the raw text
    InvalidResponse(String),
    /// Daemon answered with `status: error`
    DaemonError(String),
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcError::DaemonNotRunning => write!(f, "Daemon not running"),
            IpcError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            IpcError::SendFailed(e) => write!(f, "Send failed: {}", e),
            IpcError::ReceiveFailed(e) => write!(f, "Receive failed: {}", e),
            IpcError::Timeout(d) => write!(f, "Daemon timeout after {}ms", d.as_millis()),
            IpcError::InvalidResponse(raw) => write!(f, "Invalid response: {}", raw),
            IpcError::DaemonError(msg) => write!(f, "Daemon error: {}", msg),
        }
    }
}

impl std::error::Error for IpcError {}

/// IPC client for one endpoint
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    /// Create a client for the given endpoint path
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the overall request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check if the daemon appears to be running (endpoint exists)
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send a message and wait for the response.
    ///
    /// Fails fast with `DaemonNotRunning` when the endpoint file is missing,
    /// and with `Timeout` if no response line arrives in time.
    pub async fn request(&self, message: &IpcMessage) -> Result<IpcResponse, IpcError> {
        if !self.socket_path.exists() {
            return Err(IpcError::DaemonNotRunning);
        }

        match tokio::time::timeout(self.timeout, self.exchange(message)).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Request to {:?} timed out", self.socket_path);
                Err(IpcError::Timeout(self.timeout))
            }
        }
    }

    /// Run a command through the daemon's remote shell and return its output
    pub async fn send_text(&self, text: &str) -> Result<String, IpcError> {
        let response = self
            .request(&IpcMessage::Send {
                text: text.to_string(),
            })
            .await?;

        match response {
            IpcResponse::Success { output } => Ok(output.unwrap_or_default()),
            IpcResponse::Error { error } => Err(IpcError::DaemonError(error)),
        }
    }

    /// Ask the daemon to shut down
    pub async fn disconnect(&self) -> Result<(), IpcError> {
        match self.request(&IpcMessage::Disconnect).await? {
            IpcResponse::Success { .. } => Ok(()),
            IpcResponse::Error { error } => Err(IpcError::DaemonError(error)),
        }
    }

    async fn exchange(&self, message: &IpcMessage) -> Result<IpcResponse, IpcError> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                IpcError::DaemonNotRunning
            } else {
                IpcError::ConnectionFailed(e)
            }
        })?;

        // Send message as JSON line
        let json = serde_json::to_string(message).map_err(|e| {
            IpcError::SendFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })? + "\n";

        stream
            .write_all(json.as_bytes())
            .await
            .map_err(IpcError::SendFailed)?;
        stream.flush().await.map_err(IpcError::SendFailed)?;

        // Read one line (or whatever arrived before the daemon closed)
        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .await
            .map_err(IpcError::ReceiveFailed)?;

        serde_json::from_str(response_line.trim())
            .map_err(|_| IpcError::InvalidResponse(response_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_daemon_not_running() {
        let client = IpcClient::new(PathBuf::from("/nonexistent/path.sock"));
        assert!(!client.daemon_available());

        let result = client.request(&IpcMessage::Disconnect).await;
        assert!(matches!(result, Err(IpcError::DaemonNotRunning)));
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let msg: IpcMessage = serde_json::from_str(&line).unwrap();
            assert_eq!(
                msg,
                IpcMessage::Send {
                    text: "echo hi".to_string()
                }
            );
            let mut stream = reader.into_inner();
            stream
                .write_all(IpcResponse::output("hi\n").to_line().unwrap().as_bytes())
                .await
                .unwrap();
        });

        let client = IpcClient::new(&path);
        let output = client.send_text("echo hi").await.unwrap();
        assert_eq!(output, "hi\n");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_daemon_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();

        // Accept and hold the connection without ever answering
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(stream);
        });

        let timeout = Duration::from_millis(200);
        let client = IpcClient::new(&path).with_timeout(timeout);
        let started = std::time::Instant::now();
        let result = client.request(&IpcMessage::Disconnect).await;

        assert!(matches!(result, Err(IpcError::Timeout(d)) if d == timeout));
        assert!(started.elapsed() < Duration::from_secs(1));
        server.abort();
    }

    #[tokio::test]
    async fn test_invalid_response_keeps_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.into_inner().write_all(b"not json\n").await.unwrap();
        });

        let client = IpcClient::new(&path);
        match client.request(&IpcMessage::Disconnect).await {
            Err(IpcError::InvalidResponse(raw)) => assert_eq!(raw, "not json\n"),
            other => panic!("expected invalid response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_daemon_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            reader.read_line(&mut request).await.unwrap();
            let line = IpcResponse::error("Unknown command").to_line().unwrap();
            reader.into_inner().write_all(line.as_bytes()).await.unwrap();
        });

        let result = IpcClient::new(&path).send_text("ls").await;
        assert!(matches!(result, Err(IpcError::DaemonError(ref e)) if e == "Unknown command"));
    }
}

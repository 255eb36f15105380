//! Wire protocol between the CLI and a seed's daemon.
//!
//! Every message and response is a single JSON document followed by `\n`.
//! One connection carries exactly one request and one response.

use serde::{Deserialize, Serialize};

/// Request sent to a daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IpcMessage {
    /// Run a command through the remote shell
    Send { text: String },

    /// Shut the daemon down
    Disconnect,

    /// Any `type` the daemon does not understand
    #[serde(other)]
    Unknown,
}

/// Response from a daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IpcResponse {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    Error {
        error: String,
    },
}

impl IpcResponse {
    pub fn ok() -> Self {
        IpcResponse::Success { output: None }
    }

    pub fn output(output: impl Into<String>) -> Self {
        IpcResponse::Success {
            output: Some(output.into()),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        IpcResponse::Error {
            error: error.into(),
        }
    }

    /// Serialize as one newline-terminated line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        Ok(serde_json::to_string(self)? + "\n")
    }
}

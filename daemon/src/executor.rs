//! Remote command execution through the remote-shell tool

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use shelly_core::config::ToolConfig;

/// Result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Stdout on success, `ERROR: <text>\n` on failure
    pub output: String,
    /// The failure looked like the remote link went away
    pub connection_lost: bool,
}

pub struct RemoteShell {
    program: String,
    args: Vec<String>,
    remote_seed: String,
    user: String,
    timeout: Duration,
    fatal: Vec<Regex>,
}

impl RemoteShell {
    pub fn new(
        tool: &ToolConfig,
        remote_seed: String,
        user: String,
        timeout: Duration,
        fatal_patterns: &[String],
    ) -> Result<Self> {
        let fatal = fatal_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid fatal pattern {:?}", p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            program: tool.program.clone(),
            args: tool.args.clone(),
            remote_seed,
            user,
            timeout,
            fatal,
        })
    }

    /// Run `text` remotely. Never fails; errors are folded into the output.
    pub async fn run(&self, text: &str) -> Outcome {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("-s")
            .arg(&self.remote_seed)
            .arg("-u")
            .arg(&self.user)
            .arg("-e")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return self.failure(format!("Failed to run {}: {}", self.program, e)),
            Err(_) => {
                return self.failure(format!(
                    "Command timed out after {}ms (ETIMEDOUT)",
                    self.timeout.as_millis()
                ))
            }
        };

        if output.status.success() {
            debug!("Remote command succeeded ({} bytes)", output.stdout.len());
            return Outcome {
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
                connection_lost: false,
            };
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        self.failure(format!(
            "Command failed ({}): {}",
            output.status,
            stderr.trim_end()
        ))
    }

    fn failure(&self, message: String) -> Outcome {
        let connection_lost = self.is_fatal(&message);
        if connection_lost {
            warn!("Fatal remote error: {}", message);
        } else {
            debug!("Remote error: {}", message);
        }
        Outcome {
            output: format!("ERROR: {}\n", message),
            connection_lost,
        }
    }

    /// Whether error text signals a lost connection.
    pub fn is_fatal(&self, message: &str) -> bool {
        self.fatal.iter().any(|re| re.is_match(message))
    }
}

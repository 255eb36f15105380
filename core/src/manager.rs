//! Interactive sessions over directly spawned remote-shell processes
//!
//! Unlike the per-seed daemons, these sessions live only as long as this
//! process. Each one is a child with piped stdio: stdout chunks flow into the
//! hook pipeline as `data:received`, stderr chunks become session errors.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::hooks::{
    self, payload, HookPipeline, BUFFER_CLEAR, BUFFER_GET, DATA_RECEIVED, LOG_ENTRY,
    SESSION_CREATED, SESSION_DELETED, SESSION_POST_CONNECT, SESSION_POST_SEND,
    SESSION_PRE_CONNECT, SESSION_PRE_DISCONNECT, SESSION_PRE_SEND,
};
use crate::registry::SessionRegistry;
use crate::types::{LogLevel, SessionRecord, SessionState};
use crate::validation::Validator;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Explicit session id (default: generated)
    pub session_id: Option<String>,
    /// Extra arguments appended to the remote-shell invocation
    pub args: Vec<String>,
}

/// Row of `list_sessions`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub seed: String,
    pub user: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub buffer_size: usize,
    pub error_count: usize,
}

struct Connection {
    pid: Option<u32>,
    stdin: ChildStdin,
    kill: Option<oneshot::Sender<()>>,
}

pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    pipeline: Arc<HookPipeline>,
    validator: Validator,
    tool: ToolConfig,
    connections: Mutex<HashMap<String, Connection>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        pipeline: Arc<HookPipeline>,
        tool: ToolConfig,
    ) -> Self {
        Self {
            registry,
            pipeline,
            validator: Validator::new(),
            tool,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn generate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("sess_{}_{}", Utc::now().timestamp_millis(), n)
    }

    async fn log(&self, level: LogLevel, msg: String, session: &str) {
        self.registry.log(level, msg.clone(), Some(session));
        let entry = payload(json!({"sessionId": session, "level": level.as_str(), "msg": msg}));
        if let Err(e) = self.pipeline.dispatch(LOG_ENTRY, entry).await {
            debug!("log:entry hook failed: {}", e);
        }
    }

    /// Spawn a remote-shell child for `seed` as `user` and track it as a session.
    pub async fn connect(
        &self,
        seed: &str,
        user: &str,
        opts: ConnectOptions,
    ) -> Result<SessionRecord> {
        let id = opts.session_id.clone().unwrap_or_else(|| self.generate_id());
        let request = payload(json!({"seed": seed, "user": user, "sessionId": id}));
        self.validator.validate_operation("connect", &request)?;
        self.validator.check_str("seed", seed)?;
        self.validator.check_str("sessionId", &id)?;

        let request = self.pipeline.dispatch(SESSION_PRE_CONNECT, request).await?;

        self.registry.create(&id, seed, user);
        self.pipeline
            .dispatch(
                SESSION_CREATED,
                payload(json!({"sessionId": id, "seed": seed, "user": user})),
            )
            .await?;
        self.registry.set_state(&id, SessionState::Connecting);
        self.log(LogLevel::Info, format!("Session {} connecting", id), &id)
            .await;

        let mut child = match Command::new(&self.tool.program)
            .args(&self.tool.args)
            .arg("-s")
            .arg(seed)
            .arg("-u")
            .arg(user)
            .args(&opts.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let msg = format!("Failed to connect: {}", e);
                self.registry.record_error(&id, &msg);
                self.registry.set_state(&id, SessionState::Disconnected);
                self.log(LogLevel::Error, msg, &id).await;
                return Err(e.into());
            }
        };

        let pid = child.id();
        let (stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => return Err(Error::Other("Remote shell stdio not captured".into())),
            };

        self.spawn_reader(id.clone(), stdout, false);
        self.spawn_reader(id.clone(), stderr, true);

        // Before the exit watcher starts, so an instant exit is not overwritten
        self.registry.set_state(&id, SessionState::Connected);

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let registry = Arc::clone(&self.registry);
        let exit_id = id.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        debug!("Kill of session {} failed: {}", exit_id, e);
                    }
                    child.wait().await
                }
            };
            registry.set_state(&exit_id, SessionState::Disconnected);
            let code = status
                .ok()
                .and_then(|s| s.code())
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            registry.log(
                LogLevel::Info,
                format!("Session {} closed with code {}", exit_id, code),
                Some(&exit_id),
            );
        });

        self.connections.lock().await.insert(
            id.clone(),
            Connection {
                pid,
                stdin,
                kill: Some(kill_tx),
            },
        );

        self.registry.touch(&id);
        self.log(LogLevel::Info, format!("Session {} connected", id), &id)
            .await;
        self.pipeline.dispatch(SESSION_POST_CONNECT, request).await?;

        self.registry
            .get(&id)
            .ok_or_else(|| Error::SessionNotFound(id.clone()))
    }

    fn spawn_reader<R>(&self, id: String, mut stream: R, is_stderr: bool)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            let mut decoder = ChunkDecoder::default();
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        debug!("Read from session {} ended: {}", id, e);
                        break;
                    }
                };
                let chunk = decoder.push(&buf[..n]);
                if !chunk.is_empty() {
                    emit_chunk(&registry, &pipeline, &id, chunk, is_stderr).await;
                }
            }
            let tail = decoder.finish();
            if !tail.is_empty() {
                emit_chunk(&registry, &pipeline, &id, tail, is_stderr).await;
            }
        });
    }

    /// Write `data` to the session's stdin.
    pub async fn send(&self, id: &str, data: &str) -> Result<SessionRecord> {
        let request = payload(json!({"sessionId": id, "data": data}));
        self.validator.validate_operation("send", &request)?;
        let request = self.pipeline.dispatch(SESSION_PRE_SEND, request).await?;

        let record = self
            .registry
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        if record.state != SessionState::Connected {
            return Err(Error::Precondition(format!("Session {} not connected", id)));
        }

        {
            let mut connections = self.connections.lock().await;
            let conn = connections
                .get_mut(id)
                .ok_or_else(|| Error::Precondition(format!("Session {} not connected", id)))?;
            let written = async {
                conn.stdin.write_all(data.as_bytes()).await?;
                conn.stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                self.registry.record_error(id, &e.to_string());
                return Err(e.into());
            }
        }

        self.registry.touch(id);
        let preview: String = data.chars().take(100).collect();
        self.log(LogLevel::Info, format!("Sent to {}: {}", id, preview), id)
            .await;
        self.pipeline.dispatch(SESSION_POST_SEND, request).await?;

        self.registry
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Kill the session's child; the record stays until `remove`.
    pub async fn disconnect(&self, id: &str) -> Result<SessionRecord> {
        let request = payload(json!({"sessionId": id}));
        self.validator.validate_operation("disconnect", &request)?;
        if !self.registry.contains(id) {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        self.pipeline.dispatch(SESSION_PRE_DISCONNECT, request).await?;

        if let Some(mut conn) = self.connections.lock().await.remove(id) {
            debug!("Stopping session {} (pid {:?})", id, conn.pid);
            if let Some(kill) = conn.kill.take() {
                // The exit watcher is gone if the child already exited
                let _ = kill.send(());
            }
        }

        self.registry.set_state(id, SessionState::Disconnected);
        self.log(LogLevel::Info, format!("Session {} disconnected", id), id)
            .await;

        self.registry
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Disconnect if needed and forget the session entirely.
    pub async fn remove(&self, id: &str) -> Result<()> {
        if !self.registry.contains(id) {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        if self.connections.lock().await.contains_key(id) {
            self.disconnect(id).await?;
        }
        if let Some(record) = self.registry.remove(id) {
            self.pipeline
                .dispatch(
                    SESSION_DELETED,
                    payload(json!({"sessionId": id, "seed": record.seed})),
                )
                .await?;
        }
        Ok(())
    }

    /// Everything the session has printed since the last clear.
    pub async fn get_buffer(&self, id: &str) -> Result<String> {
        let request = payload(json!({"sessionId": id}));
        self.validator.validate_operation("getBuffer", &request)?;
        if !self.registry.contains(id) {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        let out = self.pipeline.dispatch(BUFFER_GET, request).await?;
        Ok(hooks::str_field(&out, "content")
            .unwrap_or_default()
            .to_string())
    }

    /// Drop buffered output; returns the number of chunks cleared.
    pub async fn clear_buffer(&self, id: &str) -> Result<usize> {
        let request = payload(json!({"sessionId": id}));
        self.validator.validate_operation("clearBuffer", &request)?;
        if !self.registry.contains(id) {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        let out = self.pipeline.dispatch(BUFFER_CLEAR, request).await?;
        Ok(out.get("cleared").and_then(Value::as_u64).unwrap_or(0) as usize)
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        for record in self.registry.sessions() {
            let buffer_size = self.get_buffer(&record.id).await.map_or(0, |b| b.len());
            summaries.push(SessionSummary {
                buffer_size,
                error_count: record.errors.len(),
                id: record.id,
                seed: record.seed,
                user: record.user,
                state: record.state,
                created_at: record.created_at,
                last_activity: record.last_activity,
            });
        }
        summaries
    }

    /// Kill every live child.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.connections.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.disconnect(&id).await {
                warn!("Failed to disconnect {}: {}", id, e);
            }
        }
    }
}

/// Stdout chunks become `data:received`; stderr chunks become session errors.
async fn emit_chunk(
    registry: &SessionRegistry,
    pipeline: &HookPipeline,
    id: &str,
    chunk: String,
    is_stderr: bool,
) {
    if is_stderr {
        registry.record_error(id, &chunk);
        registry.log(LogLevel::Error, chunk.clone(), Some(id));
        let entry = payload(json!({"sessionId": id, "level": "error", "msg": chunk}));
        if let Err(e) = pipeline.dispatch(LOG_ENTRY, entry).await {
            debug!("log:entry hook failed: {}", e);
        }
    } else {
        let data = payload(json!({"sessionId": id, "content": chunk}));
        if let Err(e) = pipeline.dispatch(DATA_RECEIVED, data).await {
            warn!("data:received hook failed for {}: {}", id, e);
        }
    }
}

/// Decodes a byte stream read in arbitrary pieces. A UTF-8 sequence cut off
/// at the end of one read is held back until the next.
#[derive(Debug, Default)]
struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let complete = self.pending.len() - incomplete_suffix_len(&self.pending);
        let rest = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }

    /// Whatever is left at end of stream, lossily.
    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

/// Length of a trailing multi-byte sequence still missing bytes.
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let needed = match b {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::builtin::Builtins;
    use std::time::Duration;

    /// A remote-shell stand-in: `sh -c <script> shell -s SEED -u USER ...`
    fn manager(script: &str) -> (Arc<SessionRegistry>, SessionManager) {
        let registry = Arc::new(SessionRegistry::default());
        let pipeline = Arc::new(HookPipeline::new().with_registry(Arc::clone(&registry)));
        Builtins::new(Arc::clone(&registry))
            .install(&pipeline, &[])
            .unwrap();
        let tool = ToolConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "shell".to_string()],
        };
        let manager = SessionManager::new(Arc::clone(&registry), pipeline, tool);
        (registry, manager)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_echo_session_roundtrip() {
        let (_, manager) = manager("cat");
        let opts = ConnectOptions {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        let record = manager.connect("abc", "alice", opts).await.unwrap();
        assert_eq!(record.state, SessionState::Connected);

        manager.send("s1", "hello\n").await.unwrap();

        let mut content = String::new();
        for _ in 0..100 {
            content = manager.get_buffer("s1").await.unwrap();
            if content == "hello\n" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(content, "hello\n");

        assert!(manager.clear_buffer("s1").await.unwrap() >= 1);
        assert_eq!(manager.get_buffer("s1").await.unwrap(), "");

        let record = manager.disconnect("s1").await.unwrap();
        assert_eq!(record.state, SessionState::Disconnected);

        let err = manager.send("s1", "again\n").await.unwrap_err();
        assert_eq!(err.to_string(), "Session s1 not in connected state");
    }

    #[tokio::test]
    async fn test_stderr_becomes_session_errors() {
        let (registry, manager) = manager("echo oops >&2; sleep 5");
        let opts = ConnectOptions {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        manager.connect("abc", "alice", opts).await.unwrap();

        let got_error = wait_for(|| {
            registry
                .get("s1")
                .map_or(false, |r| r.errors.iter().any(|e| e.contains("oops")))
        })
        .await;
        assert!(got_error);

        let sessions = manager.list_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].error_count >= 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_child_exit_marks_disconnected() {
        let (registry, manager) = manager("exit 3");
        let opts = ConnectOptions {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        manager.connect("abc", "alice", opts).await.unwrap();

        let closed = wait_for(|| {
            registry
                .get("s1")
                .map_or(false, |r| r.state == SessionState::Disconnected)
        })
        .await;
        assert!(closed);
    }

    #[tokio::test]
    async fn test_invalid_connect_is_rejected_before_spawn() {
        let (registry, manager) = manager("cat");
        let err = manager
            .connect("abc", "", ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(registry.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_remove_forgets_session() {
        let (registry, manager) = manager("cat");
        let opts = ConnectOptions {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        manager.connect("abc", "alice", opts).await.unwrap();

        manager.remove("s1").await.unwrap();
        assert!(!registry.contains("s1"));
        assert!(matches!(
            manager.get_buffer("s1").await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_decoder_joins_split_characters() {
        let text = "héllo → 世界 🦀";
        let bytes = text.as_bytes();
        // Split inside every multi-byte sequence in turn
        for cut in 1..bytes.len() {
            let mut decoder = ChunkDecoder::default();
            let mut out = decoder.push(&bytes[..cut]);
            out.push_str(&decoder.push(&bytes[cut..]));
            out.push_str(&decoder.finish());
            assert_eq!(out, text, "cut at {}", cut);
        }
    }

    #[test]
    fn test_decoder_flushes_truncated_tail() {
        let mut decoder = ChunkDecoder::default();
        assert_eq!(decoder.push(b"ok \xE4\xB8"), "ok ");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}

//! In-memory session table and bounded log ring
//!
//! One registry is constructed per process and shared (via `Arc`) between the
//! coordinator, the session manager and the plugins that inspect session state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::types::{LogEntry, LogLevel, SessionRecord, SessionState};

/// Filter for `SessionRegistry::logs`.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    logs: VecDeque<LogEntry>,
}

#[derive(Debug)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    max_log_entries: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl SessionRegistry {
    pub fn new(max_log_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_log_entries: max_log_entries.max(1),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        // State stays usable even if a holder panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a new disconnected session, replacing any record with the same id.
    pub fn create(&self, id: &str, seed: &str, user: &str) -> SessionRecord {
        let now = Utc::now();
        let record = SessionRecord {
            id: id.to_string(),
            seed: seed.to_string(),
            user: user.to_string(),
            state: SessionState::Disconnected,
            created_at: now,
            last_activity: now,
            errors: Vec::new(),
        };
        self.inner()
            .sessions
            .insert(id.to_string(), record.clone());
        record
    }

    pub fn get(&self, id: &str) -> Option<SessionRecord> {
        self.inner().sessions.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<SessionRecord> {
        self.inner().sessions.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner().sessions.contains_key(id)
    }

    /// Set a session's state; returns false for unknown ids.
    pub fn set_state(&self, id: &str, state: SessionState) -> bool {
        match self.inner().sessions.get_mut(id) {
            Some(record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }

    pub fn touch(&self, id: &str) {
        if let Some(record) = self.inner().sessions.get_mut(id) {
            record.last_activity = Utc::now();
        }
    }

    pub fn record_error(&self, id: &str, message: &str) {
        if let Some(record) = self.inner().sessions.get_mut(id) {
            record.errors.push(message.to_string());
        }
    }

    /// All sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionRecord> {
        let mut sessions: Vec<SessionRecord> = self.inner().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    /// Append to the log ring (dropping the oldest entry when full) and mirror
    /// the message to tracing.
    pub fn log(&self, level: LogLevel, msg: impl Into<String>, session: Option<&str>) -> LogEntry {
        let entry = LogEntry {
            ts: Utc::now(),
            level,
            msg: msg.into(),
            session: session.map(str::to_string),
        };

        match level {
            LogLevel::Info => info!(session = ?entry.session, "{}", entry.msg),
            LogLevel::Warn => warn!(session = ?entry.session, "{}", entry.msg),
            LogLevel::Error => error!(session = ?entry.session, "{}", entry.msg),
        }

        let mut inner = self.inner();
        inner.logs.push_back(entry.clone());
        while inner.logs.len() > self.max_log_entries {
            inner.logs.pop_front();
        }
        entry
    }

    pub fn logs(&self, filter: &LogFilter) -> Vec<LogEntry> {
        self.inner()
            .logs
            .iter()
            .filter(|e| filter.level.map_or(true, |l| e.level == l))
            .filter(|e| filter.since.map_or(true, |s| e.ts >= s))
            .cloned()
            .collect()
    }

    /// Drop every log entry; returns how many were removed.
    pub fn clear_logs(&self) -> usize {
        let mut inner = self.inner();
        let count = inner.logs.len();
        inner.logs.clear();
        count
    }

    /// Forget all sessions and logs.
    pub fn reset(&self) {
        let mut inner = self.inner();
        inner.sessions.clear();
        inner.logs.clear();
    }
}

//! Per-session log records appended through `log:entry`

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::hooks::{handler, str_field, Plugin, LOG_ENTRY, SESSION_CREATED, SESSION_DELETED};
use crate::types::{LogEntry, LogLevel};

/// Per-session log history fed by `log:entry`.
#[derive(Default)]
pub struct LoggingPlugin {
    logs: Mutex<HashMap<String, Vec<LogEntry>>>,
}

impl LoggingPlugin {
    pub const NAME: &'static str = "logging";

    pub fn new() -> Self {
        Self::default()
    }

    fn logs(&self) -> MutexGuard<'_, HashMap<String, Vec<LogEntry>>> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn plugin(self: &Arc<Self>) -> Plugin {
        let created = Arc::clone(self);
        let deleted = Arc::clone(self);
        let entry = Arc::clone(self);

        Plugin::new(Self::NAME)
            .on(
                SESSION_CREATED,
                handler(move |p| {
                    if let Some(id) = str_field(&p, "sessionId") {
                        created.logs().entry(id.to_string()).or_default();
                    }
                    Ok(None)
                }),
            )
            .on(
                SESSION_DELETED,
                handler(move |p| {
                    if let Some(id) = str_field(&p, "sessionId") {
                        deleted.logs().remove(id);
                    }
                    Ok(None)
                }),
            )
            .on(
                LOG_ENTRY,
                handler(move |p| {
                    let Some(id) = str_field(&p, "sessionId") else {
                        return Ok(None);
                    };
                    let level = str_field(&p, "level")
                        .and_then(LogLevel::parse)
                        .unwrap_or(LogLevel::Info);
                    let record = LogEntry {
                        ts: Utc::now(),
                        level,
                        msg: str_field(&p, "msg").unwrap_or_default().to_string(),
                        session: Some(id.to_string()),
                    };
                    entry.logs().entry(id.to_string()).or_default().push(record);
                    Ok(None)
                }),
            )
    }

    pub fn get(&self, session_id: &str) -> Vec<LogEntry> {
        self.logs().get(session_id).cloned().unwrap_or_default()
    }

    /// Forget a session's history; returns how many entries were dropped.
    pub fn clear(&self, session_id: &str) -> usize {
        self.logs()
            .get_mut(session_id)
            .map(|entries| std::mem::take(entries).len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{payload, HookPipeline};
    use serde_json::json;

    #[tokio::test]
    async fn test_entries_are_kept_per_session() {
        let logging = Arc::new(LoggingPlugin::new());
        let pipeline = HookPipeline::new();
        pipeline.load(logging.plugin()).unwrap();

        pipeline
            .dispatch(
                LOG_ENTRY,
                payload(json!({"sessionId": "s1", "level": "error", "msg": "boom"})),
            )
            .await
            .unwrap();
        pipeline
            .dispatch(LOG_ENTRY, payload(json!({"sessionId": "s2", "msg": "hi"})))
            .await
            .unwrap();

        let s1 = logging.get("s1");
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].level, LogLevel::Error);
        assert_eq!(s1[0].msg, "boom");
        assert_eq!(logging.get("s2")[0].level, LogLevel::Info);

        assert_eq!(logging.clear("s1"), 1);
        assert!(logging.get("s1").is_empty());

        pipeline
            .dispatch(SESSION_DELETED, payload(json!({"sessionId": "s2"})))
            .await
            .unwrap();
        assert!(logging.get("s2").is_empty());
    }
}

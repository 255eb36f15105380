//! Per-session output buffers fed by `data:received`

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;

use crate::hooks::{
    handler, str_field, HookResult, Payload, Plugin, BUFFER_CLEAR, BUFFER_GET, DATA_RECEIVED,
    SESSION_CREATED, SESSION_DELETED,
};

/// Per-session output buffers, filled from `data:received`.
#[derive(Default)]
pub struct BufferPlugin {
    buffers: Mutex<HashMap<String, Vec<String>>>,
}

impl BufferPlugin {
    pub const NAME: &'static str = "buffer";

    pub fn new() -> Self {
        Self::default()
    }

    fn buffers(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn plugin(self: &Arc<Self>) -> Plugin {
        let created = Arc::clone(self);
        let deleted = Arc::clone(self);
        let received = Arc::clone(self);
        let get = Arc::clone(self);
        let clear = Arc::clone(self);

        Plugin::new(Self::NAME)
            .on(
                SESSION_CREATED,
                handler(move |p| {
                    if let Some(id) = str_field(&p, "sessionId") {
                        created.buffers().entry(id.to_string()).or_default();
                    }
                    Ok(None)
                }),
            )
            .on(
                SESSION_DELETED,
                handler(move |p| {
                    if let Some(id) = str_field(&p, "sessionId") {
                        deleted.buffers().remove(id);
                    }
                    Ok(None)
                }),
            )
            .on(DATA_RECEIVED, handler(move |p| received.on_data(p)))
            .on(
                BUFFER_GET,
                handler(move |mut p| {
                    let content = str_field(&p, "sessionId")
                        .map(|id| get.content(id))
                        .unwrap_or_default();
                    p.insert("content".into(), json!(content));
                    Ok(Some(p))
                }),
            )
            .on(
                BUFFER_CLEAR,
                handler(move |mut p| {
                    let cleared = str_field(&p, "sessionId")
                        .map(|id| clear.clear(id))
                        .unwrap_or(0);
                    p.insert("cleared".into(), json!(cleared));
                    Ok(Some(p))
                }),
            )
    }

    fn on_data(&self, payload: Payload) -> HookResult {
        if let (Some(id), Some(content)) = (
            str_field(&payload, "sessionId"),
            str_field(&payload, "content"),
        ) {
            self.buffers()
                .entry(id.to_string())
                .or_default()
                .push(content.to_string());
        }
        Ok(None)
    }

    /// Everything buffered for a session, concatenated.
    pub fn content(&self, session_id: &str) -> String {
        self.buffers()
            .get(session_id)
            .map(|chunks| chunks.concat())
            .unwrap_or_default()
    }

    /// Drop a session's buffered chunks; returns how many there were.
    pub fn clear(&self, session_id: &str) -> usize {
        self.buffers()
            .get_mut(session_id)
            .map(|chunks| std::mem::take(chunks).len())
            .unwrap_or(0)
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.buffers().get(session_id).map_or(0, Vec::len)
    }
}

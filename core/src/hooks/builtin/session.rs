//! Session lifecycle checks against the registry

use std::sync::Arc;

use serde_json::Value;

use crate::hooks::{
    handler, str_field, HookError, HookResult, Payload, Plugin, SESSION_POST_CONNECT,
    SESSION_POST_SEND, SESSION_PRE_CONNECT, SESSION_PRE_DISCONNECT, SESSION_PRE_SEND,
};
use crate::registry::SessionRegistry;
use crate::types::{LogLevel, SessionState};

/// Guards session transitions against the registry.
pub struct SessionPlugin {
    registry: Arc<SessionRegistry>,
}

impl SessionPlugin {
    pub const NAME: &'static str = "session";

    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn plugin(self: &Arc<Self>) -> Plugin {
        let pre_connect = Arc::clone(self);
        let post_connect = Arc::clone(self);
        let pre_send = Arc::clone(self);
        let post_send = Arc::clone(self);
        let pre_disconnect = Arc::clone(self);

        Plugin::new(Self::NAME)
            .on(
                SESSION_PRE_CONNECT,
                handler(move |p| pre_connect.pre_connect(p)),
            )
            .on(
                SESSION_POST_CONNECT,
                handler(move |p| post_connect.post_connect(p)),
            )
            .on(SESSION_PRE_SEND, handler(move |p| pre_send.pre_send(p)))
            .on(SESSION_POST_SEND, handler(move |p| post_send.post_send(p)))
            .on(
                SESSION_PRE_DISCONNECT,
                handler(move |p| pre_disconnect.pre_disconnect(p)),
            )
    }

    fn pre_connect(&self, payload: Payload) -> HookResult {
        for field in ["seed", "user"] {
            match payload.get(field) {
                Some(Value::String(s)) if !s.is_empty() => {}
                _ => {
                    return Err(HookError::rejected(format!(
                        "Invalid {}: must be non-empty string",
                        field
                    )))
                }
            }
        }
        Ok(None)
    }

    fn post_connect(&self, payload: Payload) -> HookResult {
        let session = str_field(&payload, "sessionId");
        self.registry.log(
            LogLevel::Info,
            format!(
                "Session connected as {}",
                str_field(&payload, "user").unwrap_or("unknown")
            ),
            session,
        );
        Ok(None)
    }

    fn pre_send(&self, payload: Payload) -> HookResult {
        let id = str_field(&payload, "sessionId").unwrap_or_default();
        match self.registry.get(id) {
            None => Err(HookError::rejected(format!("Session {} not found", id))),
            Some(record) if record.state != SessionState::Connected => Err(HookError::rejected(
                format!("Session {} not in connected state", id),
            )),
            Some(_) => Ok(None),
        }
    }

    fn post_send(&self, payload: Payload) -> HookResult {
        if let Some(id) = str_field(&payload, "sessionId") {
            self.registry.touch(id);
        }
        Ok(None)
    }

    fn pre_disconnect(&self, payload: Payload) -> HookResult {
        if let Some(id) = str_field(&payload, "sessionId") {
            self.registry
                .log(LogLevel::Info, "Cleaning up session", Some(id));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{payload, HookPipeline};
    use serde_json::json;

    fn setup() -> (Arc<SessionRegistry>, HookPipeline) {
        let registry = Arc::new(SessionRegistry::default());
        let pipeline = HookPipeline::new();
        pipeline
            .load(Arc::new(SessionPlugin::new(Arc::clone(&registry))).plugin())
            .unwrap();
        (registry, pipeline)
    }

    #[tokio::test]
    async fn test_pre_connect_rejects_bad_identity() {
        let (_, pipeline) = setup();

        let err = pipeline
            .dispatch(SESSION_PRE_CONNECT, payload(json!({"seed": "", "user": "alice"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid seed: must be non-empty string");

        let err = pipeline
            .dispatch(SESSION_PRE_CONNECT, payload(json!({"seed": "abc", "user": 7})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid user: must be non-empty string");

        assert!(pipeline
            .dispatch(SESSION_PRE_CONNECT, payload(json!({"seed": "abc", "user": "alice"})))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_pre_send_requires_connected_session() {
        let (registry, pipeline) = setup();
        let send = || payload(json!({"sessionId": "s1", "data": "ls"}));

        let err = pipeline.dispatch(SESSION_PRE_SEND, send()).await.unwrap_err();
        assert_eq!(err.to_string(), "Session s1 not found");

        registry.create("s1", "abc", "alice");
        let err = pipeline.dispatch(SESSION_PRE_SEND, send()).await.unwrap_err();
        assert_eq!(err.to_string(), "Session s1 not in connected state");

        registry.set_state("s1", SessionState::Connected);
        assert!(pipeline.dispatch(SESSION_PRE_SEND, send()).await.is_ok());
    }

    #[tokio::test]
    async fn test_post_send_touches_activity() {
        let (registry, pipeline) = setup();
        let before = registry.create("s1", "abc", "alice").last_activity;
        std::thread::sleep(std::time::Duration::from_millis(5));

        pipeline
            .dispatch(SESSION_POST_SEND, payload(json!({"sessionId": "s1"})))
            .await
            .unwrap();
        assert!(registry.get("s1").unwrap().last_activity > before);
    }
}

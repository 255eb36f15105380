//! Field, session and payload validation exposed as hook events

use std::sync::Arc;

use serde_json::json;

use crate::hooks::{
    handler, str_field, HookError, HookResult, Payload, Plugin, VALIDATE_DATA, VALIDATE_INPUT,
    VALIDATE_SESSION,
};
use crate::registry::SessionRegistry;
use crate::types::SessionState;
use crate::validation::Validator;

/// Exposes the field rules and session liveness checks as hooks.
pub struct ValidationPlugin {
    validator: Validator,
    registry: Arc<SessionRegistry>,
}

impl ValidationPlugin {
    pub const NAME: &'static str = "validation";

    pub fn new(validator: Validator, registry: Arc<SessionRegistry>) -> Self {
        Self {
            validator,
            registry,
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn plugin(self: &Arc<Self>) -> Plugin {
        let input = Arc::clone(self);
        let session = Arc::clone(self);
        let data = Arc::clone(self);

        Plugin::new(Self::NAME)
            .on(VALIDATE_INPUT, handler(move |p| input.validate_input(p)))
            .on(
                VALIDATE_SESSION,
                handler(move |p| session.validate_session(p)),
            )
            .on(VALIDATE_DATA, handler(move |p| data.validate_data(p)))
    }

    /// `{field, value}` checked against the field's rule.
    fn validate_input(&self, mut payload: Payload) -> HookResult {
        let field = str_field(&payload, "field").unwrap_or_default().to_string();
        self.validator.check(&field, payload.get("value"))?;
        payload.insert("valid".into(), json!(true));
        Ok(Some(payload))
    }

    fn validate_session(&self, mut payload: Payload) -> HookResult {
        let id = str_field(&payload, "sessionId").unwrap_or_default();
        match self.registry.get(id) {
            None => return Err(HookError::rejected(format!("Session {} not found", id))),
            Some(record) if record.state != SessionState::Connected => {
                return Err(HookError::rejected(format!("Session {} not connected", id)))
            }
            Some(_) => {}
        }
        payload.insert("valid".into(), json!(true));
        Ok(Some(payload))
    }

    /// Payload data, plus the required fields of `op` when one is named.
    fn validate_data(&self, mut payload: Payload) -> HookResult {
        if let Some(op) = str_field(&payload, "op") {
            self.validator.validate_operation(op, &payload)?;
        }
        if payload.contains_key("data") {
            self.validator.check("data", payload.get("data"))?;
        }
        payload.insert("valid".into(), json!(true));
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{payload, HookPipeline};

    fn setup() -> (Arc<SessionRegistry>, HookPipeline) {
        let registry = Arc::new(SessionRegistry::default());
        let pipeline = HookPipeline::new();
        let plugin = Arc::new(ValidationPlugin::new(Validator::new(), Arc::clone(&registry)));
        pipeline.load(plugin.plugin()).unwrap();
        (registry, pipeline)
    }

    #[tokio::test]
    async fn test_validate_input() {
        let (_, pipeline) = setup();
        let out = pipeline
            .dispatch(VALIDATE_INPUT, payload(json!({"field": "user", "value": "alice"})))
            .await
            .unwrap();
        assert_eq!(out.get("valid"), Some(&json!(true)));

        let err = pipeline
            .dispatch(VALIDATE_INPUT, payload(json!({"field": "user", "value": "a b"})))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Validation(_)));
    }

    #[tokio::test]
    async fn test_validate_session() {
        let (registry, pipeline) = setup();
        let check = || payload(json!({"sessionId": "s1"}));

        assert!(pipeline.dispatch(VALIDATE_SESSION, check()).await.is_err());
        registry.create("s1", "abc", "alice");
        let err = pipeline.dispatch(VALIDATE_SESSION, check()).await.unwrap_err();
        assert_eq!(err.to_string(), "Session s1 not connected");
        registry.set_state("s1", SessionState::Connected);
        assert!(pipeline.dispatch(VALIDATE_SESSION, check()).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_data_checks_operation_fields() {
        let (_, pipeline) = setup();
        let err = pipeline
            .dispatch(VALIDATE_DATA, payload(json!({"op": "send", "sessionId": "s1"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: data");

        assert!(pipeline
            .dispatch(
                VALIDATE_DATA,
                payload(json!({"op": "send", "sessionId": "s1", "data": "ls\n"}))
            )
            .await
            .is_ok());
    }
}

//! Field rules and per-operation required fields

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

/// Upper bound on a seed, in characters
pub const MAX_SEED_LEN: usize = 1024;

/// Upper bound on a single payload, in bytes
pub const MAX_DATA_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid {field}: must be a {expected}")]
    WrongType { field: String, expected: &'static str },

    #[error("Invalid {field}: must be non-empty string")]
    Empty { field: String },

    #[error("Invalid {field}: exceeds maximum length of {max} characters")]
    TooLong { field: String, max: usize },

    #[error("Invalid {field}: does not match {pattern}")]
    Pattern { field: String, pattern: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Object,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub required: bool,
    pub kind: FieldType,
    pub min_length: usize,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
}

impl FieldRule {
    fn string(min_length: usize, max_length: usize) -> Self {
        Self {
            required: true,
            kind: FieldType::String,
            min_length,
            max_length: Some(max_length),
            pattern: None,
        }
    }

    fn pattern(mut self, pattern: &str) -> Self {
        // Built-in patterns are literals; a bad one is a programming error
        self.pattern = Regex::new(pattern).ok();
        self
    }
}

/// Checks values against named field rules.
#[derive(Debug, Clone)]
pub struct Validator {
    rules: HashMap<String, FieldRule>,
}

impl Default for Validator {
    fn default() -> Self {
        let mut rules = HashMap::new();
        // Seeds are opaque; only the length is bounded
        rules.insert("seed".to_string(), FieldRule::string(1, MAX_SEED_LEN));
        rules.insert(
            "user".to_string(),
            FieldRule::string(1, 32).pattern(r"^[a-zA-Z0-9_-]+$"),
        );
        rules.insert("sessionId".to_string(), FieldRule::string(1, 64));
        rules.insert("data".to_string(), FieldRule::string(0, MAX_DATA_LEN));
        Self { rules }
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace or add the rule for a field.
    pub fn set_rule(&mut self, field: &str, rule: FieldRule) {
        self.rules.insert(field.to_string(), rule);
    }

    /// Check one value against its field's rule. Fields without a rule pass.
    pub fn check(&self, field: &str, value: Option<&Value>) -> Result<(), ValidationError> {
        let Some(rule) = self.rules.get(field) else {
            return Ok(());
        };

        let value = match value {
            None | Some(Value::Null) if rule.required => {
                return Err(ValidationError::MissingField(field.to_string()))
            }
            None | Some(Value::Null) => return Ok(()),
            Some(v) => v,
        };

        if !rule.kind.matches(value) {
            return Err(ValidationError::WrongType {
                field: field.to_string(),
                expected: rule.kind.name(),
            });
        }

        if let Some(s) = value.as_str() {
            let len = s.chars().count();
            if len < rule.min_length {
                return Err(ValidationError::Empty {
                    field: field.to_string(),
                });
            }
            if let Some(max) = rule.max_length {
                if len > max {
                    return Err(ValidationError::TooLong {
                        field: field.to_string(),
                        max,
                    });
                }
            }
            if let Some(ref pattern) = rule.pattern {
                if !pattern.is_match(s) {
                    return Err(ValidationError::Pattern {
                        field: field.to_string(),
                        pattern: pattern.as_str().to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn check_str(&self, field: &str, value: &str) -> Result<(), ValidationError> {
        self.check(field, Some(&Value::String(value.to_string())))
    }

    /// Fields an operation's payload must carry.
    pub fn required_fields(op: &str) -> &'static [&'static str] {
        match op {
            "connect" => &["seed", "user"],
            "send" => &["sessionId", "data"],
            "disconnect" => &["sessionId"],
            "getBuffer" | "clearBuffer" => &["sessionId"],
            _ => &[],
        }
    }

    /// Check that `payload` has every required field of `op`, and that each
    /// satisfies its rule.
    pub fn validate_operation(
        &self,
        op: &str,
        payload: &serde_json::Map<String, Value>,
    ) -> Result<(), ValidationError> {
        for field in Self::required_fields(op) {
            let value = payload.get(*field);
            if value.is_none() {
                return Err(ValidationError::MissingField(field.to_string()));
            }
            self.check(field, value)?;
        }
        Ok(())
    }
}

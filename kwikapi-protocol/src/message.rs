//! Response envelope shared by every protocol.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Uniform wrapper around every non-streamed response.
///
/// Successful calls carry `result`; failures carry `message`, `code` and
/// (optionally) `error`, the kind name of the failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            message: None,
            code: None,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, code: i64) -> Self {
        Self {
            success: false,
            result: None,
            message: Some(message.into()),
            code: Some(code),
            error: None,
        }
    }

    /// Builds a failure envelope for a canonical error kind.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::failure(message, code.code()).with_error(code.name())
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.success
    }

    /// Converts the envelope into a dynamic value for codec serialization.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("success".to_string(), Value::Bool(self.success));
        if self.success {
            map.insert(
                "result".to_string(),
                self.result.clone().unwrap_or(Value::Null),
            );
        }
        if let Some(ref message) = self.message {
            map.insert("message".to_string(), Value::String(message.clone()));
        }
        if let Some(code) = self.code {
            map.insert("code".to_string(), Value::from(code));
        }
        if let Some(ref error) = self.error {
            map.insert("error".to_string(), Value::String(error.clone()));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_envelope_shape() {
        let env = Envelope::ok(json!(30));
        assert_eq!(env.to_value(), json!({"success": true, "result": 30}));
        assert!(env.is_ok());
    }

    #[test]
    fn test_ok_envelope_keeps_null_result() {
        let env = Envelope::ok(Value::Null);
        assert_eq!(env.to_value(), json!({"success": true, "result": null}));
    }

    #[test]
    fn test_failure_envelope_shape() {
        let env = Envelope::failure("b can't be zero", 1101);
        assert_eq!(
            env.to_value(),
            json!({"success": false, "message": "b can't be zero", "code": 1101})
        );
    }

    #[test]
    fn test_canonical_failure_has_kind() {
        let env = Envelope::from_code(ErrorCode::UnknownApiFunction, "Unknown API Function: \"addd\"");
        let value = env.to_value();
        assert_eq!(value["code"], 50002);
        assert_eq!(value["error"], "UnknownAPIFunction");
        assert_eq!(value["success"], false);
    }

    #[test]
    fn test_envelope_deserializes() {
        let env: Envelope =
            serde_json::from_value(json!({"success": false, "message": "x", "code": 50000}))
                .unwrap();
        assert!(!env.success);
        assert_eq!(env.code, Some(50000));
        assert!(env.result.is_none());
    }
}

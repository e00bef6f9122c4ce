//! JSON-RPC 2.0 envelope codec.
//!
//! Builds request/notification envelopes, validates incoming responses
//! against the outstanding request id, and turns error objects into
//! [`RelayError::Remote`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RelayError, Result};

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON object, as used for `params` and `result`.
pub type JsonObject = serde_json::Map<String, Value>;

/// Outgoing JSON-RPC message.
///
/// A request without an `id` is a notification. `params` is kept as a map so
/// that "no params" always serializes as `{}` and never as `[]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonObject>,
}

impl RequestEnvelope {
    /// A request that expects a correlated response.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: JsonObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }

    /// A notification: no `id`, no reply expected.
    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: None,
        }
    }

    /// A bare `ping`, sent without params.
    pub fn ping(id: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: "ping".to_string(),
            params: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Serialize to compact JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Serialize to one newline-terminated line, for stdio framing.
    pub fn encode_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Incoming JSON-RPC response that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ResponseEnvelope {
    /// Unwrap the `result`, turning an `error` object into [`RelayError::Remote`].
    ///
    /// An absent result is an empty object.
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(error.into());
        }
        Ok(self
            .result
            .filter(|result| !result.is_null())
            .unwrap_or_else(|| Value::Object(JsonObject::new())))
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default = "default_error_code")]
    pub code: i64,
    #[serde(default = "default_error_message")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn default_error_code() -> i64 {
    -1
}

fn default_error_message() -> String {
    "Unknown error".to_string()
}

impl From<RpcError> for RelayError {
    fn from(error: RpcError) -> Self {
        let data = error
            .data
            .filter(|data| !data.is_null())
            .map(|data| data.to_string());
        RelayError::Remote {
            code: error.code,
            message: error.message,
            data,
        }
    }
}

/// Per-transport request id counter.
///
/// Ids are rendered as strings and increase by one per real request.
#[derive(Debug, Clone, Default)]
pub struct RequestIdSequence {
    current: u64,
}

impl RequestIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the new id.
    pub fn next(&mut self) -> String {
        self.current += 1;
        self.current.to_string()
    }

    /// Undo the last `next`, for messages that must not consume an id.
    pub fn rollback(&mut self) {
        self.current = self.current.saturating_sub(1);
    }

    /// The most recently issued id, `0` before the first request.
    pub fn current(&self) -> u64 {
        self.current
    }
}

/// Coerce caller params into the object shape servers accept.
///
/// `null`, `[]` and `{}` all become `{}`.
pub fn normalize_params(params: Value) -> Result<JsonObject> {
    match params {
        Value::Null => Ok(JsonObject::new()),
        Value::Object(map) => Ok(map),
        Value::Array(items) if items.is_empty() => Ok(JsonObject::new()),
        other => Err(RelayError::InvalidParams(format!(
            "params must be a JSON object; got {other}"
        ))),
    }
}

/// Whether a response `id` correlates with the outstanding request.
///
/// Servers echo the id either as the string we sent or as a number, so the
/// comparison is textual.
pub fn id_matches(id: &Value, expected: &str) -> bool {
    match id {
        Value::String(id) => id == expected,
        Value::Number(id) => id.to_string() == expected,
        _ => false,
    }
}

/// Check a parsed message against the response invariants.
///
/// `jsonrpc` must be `"2.0"`, `id` must be present and must match
/// `expected_id`. Anything else is [`RelayError::InvalidProtocolResponse`].
pub fn validate_response(message: Value, expected_id: &str) -> Result<ResponseEnvelope> {
    let version_ok = message.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION);
    let id_ok = message
        .get("id")
        .is_some_and(|id| id_matches(id, expected_id));

    if !version_ok || !id_ok {
        return Err(RelayError::InvalidProtocolResponse);
    }

    serde_json::from_value(message).map_err(|_| RelayError::InvalidProtocolResponse)
}

/// Decode raw bytes into a validated response.
pub fn decode_response(bytes: &[u8], expected_id: &str) -> Result<ResponseEnvelope> {
    let message: Value = serde_json::from_slice(bytes)?;
    validate_response(message, expected_id)
}

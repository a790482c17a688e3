//! JSON wire forms for front ends that talk to an [`Engine`](crate::Engine)
//! over a byte stream.
//!
//! Requests are `{"type": <command>, "payload": <object?>, "id": <any?>}`.
//! Responses echo the request `id` and are either
//! `{"success": true, "data": ...}` or
//! `{"success": false, "error": <message>, "code": <kind>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CommandError;

/// Request `type` that triggers a keyboard shortcut instead of a command.
pub const SHORTCUT_REQUEST: &str = "shortcut";

/// An inbound request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Request {
    /// Parse one request line.
    ///
    /// # Errors
    ///
    /// [`CommandError::InvalidPayload`] if the line is not a JSON object
    /// with a string `type`.
    pub fn from_line(line: &str) -> Result<Self, CommandError> {
        serde_json::from_str(line)
            .map_err(|e| CommandError::InvalidPayload(format!("malformed request: {e}")))
    }

    /// The `name` field of a shortcut request's payload, if any.
    pub fn shortcut_name(&self) -> Option<&str> {
        (self.kind == SHORTCUT_REQUEST)
            .then(|| self.payload.get("name").and_then(Value::as_str))
            .flatten()
    }
}

/// An outbound response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Success {
        success: Flag<true>,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    Failure {
        success: Flag<false>,
        error: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
}

impl Response {
    pub fn success(id: Option<Value>, data: Value) -> Self {
        Response::Success {
            success: Flag,
            data,
            id,
        }
    }

    pub fn failure(id: Option<Value>, err: &CommandError) -> Self {
        Response::Failure {
            success: Flag,
            error: err.to_string(),
            code: err.code().to_owned(),
            id,
        }
    }

    /// Build the response for a command outcome.
    pub fn from_result(id: Option<Value>, result: Result<Value, CommandError>) -> Self {
        match result {
            Ok(data) => Self::success(id, data),
            Err(e) => Self::failure(id, &e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }
}

/// A `success` field pinned to one boolean value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flag<const B: bool>;

impl<const B: bool> Serialize for Flag<B> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(B)
    }
}

impl<'de, const B: bool> Deserialize<'de> for Flag<B> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = bool::deserialize(deserializer)?;
        if value == B {
            Ok(Flag)
        } else {
            Err(serde::de::Error::custom(format!("expected success = {B}")))
        }
    }
}

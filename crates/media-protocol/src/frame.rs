//! Control frame types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Correlation identifier of a request/response pair, unique per connection.
pub type RequestId = u64;

/// Fire-and-forget message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Method name (see [`crate::methods`])
    pub method: String,
    /// Opaque payload object
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// Message expecting exactly one correlated [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation identifier
    pub id: RequestId,
    /// Method name (see [`crate::methods`])
    pub method: String,
    /// Opaque payload object
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// Answer to a [`Request`]. Exactly one of `data`/`error` is meaningful; a
/// present `error` always wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation identifier of the answered request
    pub id: RequestId,
    /// Result payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message reported by the remote side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Fire-and-forget message
    Notification(Notification),
    /// Correlated request
    Request(Request),
    /// Correlated response
    Response(Response),
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Notification {
    /// Create a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self {
            method: method.into(),
            data,
        }
    }
}

impl Request {
    /// Create a request.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            method: method.into(),
            data,
        }
    }
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn ok(id: RequestId, data: Value) -> Self {
        Self {
            id,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Self {
            id,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Convert into the result the requester observes. A successful response
    /// without data yields an empty object.
    ///
    /// # Errors
    ///
    /// Returns the remote error message if one was reported.
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data.unwrap_or_else(empty_object)),
        }
    }
}

impl Frame {
    /// Payload of the frame, if it carries one.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        match self {
            Frame::Notification(n) => Some(&n.data),
            Frame::Request(r) => Some(&r.data),
            Frame::Response(r) => r.data.as_ref(),
        }
    }

    /// Numeric `load` field piggybacked on the payload, if any.
    ///
    /// Media nodes attach their current load sample to arbitrary messages.
    #[must_use]
    pub fn load(&self) -> Option<f64> {
        self.data()
            .and_then(|data| data.get("load"))
            .and_then(Value::as_f64)
            .filter(|load| load.is_finite())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_is_read_from_any_frame_type() {
        let n = Frame::Notification(Notification::new("producerScore", json!({ "load": 0.4 })));
        let r = Frame::Request(Request::new(1, "getRouter", json!({ "load": 0.5 })));
        let resp = Frame::Response(Response::ok(1, json!({ "id": "r1", "load": 0.6 })));

        assert_eq!(n.load(), Some(0.4));
        assert_eq!(r.load(), Some(0.5));
        assert_eq!(resp.load(), Some(0.6));
    }

    #[test]
    fn test_non_numeric_load_is_ignored() {
        let n = Frame::Notification(Notification::new("x", json!({ "load": "high" })));
        assert_eq!(n.load(), None);

        let err = Frame::Response(Response::error(3, "boom"));
        assert_eq!(err.load(), None);
    }

    #[test]
    fn test_response_error_wins_over_data() {
        let resp = Response {
            id: 9,
            data: Some(json!({ "ignored": true })),
            error: Some("failed".to_string()),
        };
        assert_eq!(resp.into_result(), Err("failed".to_string()));

        let empty = Response {
            id: 10,
            data: None,
            error: None,
        };
        assert_eq!(empty.into_result(), Ok(json!({})));
    }
}

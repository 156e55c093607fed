use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

use crate::TransactionId;

/// The unit of RPC traffic.
///
/// Wire shape (JSON object):
///
/// ```text
/// {"method": "echo", "tid": 1, "timestamp": 1700000000000, "data": {...}}
/// ```
///
/// The same `data` field carries the request arguments on the outbound leg
/// and the result on the reply leg. Any other top-level fields sent by a peer
/// (`bid`, `gateway`, ...) are kept in [`extra`](Self::extra) and travel back
/// unchanged in the reply.
///
/// # Example
///
/// ```
/// # use pubsub_rpc::Envelope;
/// # use serde_json::json;
/// let env = Envelope::new("echo", 1, json!({"msg": "hi"})).with_timestamp(1_700_000_000_000u64);
/// assert_eq!(env.method, "echo");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    // ---
    /// Remote procedure name; required and non-empty.
    pub method: String,

    /// Transaction identifier chosen by the caller.
    pub tid: TransactionId,

    /// Optional timestamp, carried through unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Number>,

    /// Request arguments or reply result.
    #[serde(default)]
    pub data: Value,

    /// Additional top-level fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    // ---
    /// Create an envelope without timestamp or extra fields.
    pub fn new(method: impl Into<String>, tid: impl Into<TransactionId>, data: Value) -> Self {
        // ---
        Self {
            method: method.into(),
            tid: tid.into(),
            timestamp: None,
            data,
            extra: Map::new(),
        }
    }

    /// Set the diagnostic timestamp.
    pub fn with_timestamp(mut self, timestamp: impl Into<Number>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Attach an additional top-level field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Returns the message of an error reply, if `data` is an error payload.
    pub fn error_message(&self) -> Option<&str> {
        self.data
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
    }

    /// Replace `data` with an error payload carrying `message`.
    pub(crate) fn into_error_reply(mut self, message: impl Into<String>) -> Self {
        self.data = ErrorPayload::new(message).into_value();
        self
    }
}

/// Error payload placed in `data` when a call fails on the callee side.
///
/// Serialized as `{"error": {"message": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error details.
    pub error: ErrorDetail,
}

/// Body of an [`ErrorPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable failure description.
    pub message: String,
}

impl ErrorPayload {
    /// Create an error payload.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
            },
        }
    }

    fn into_value(self) -> Value {
        json!({ "error": { "message": self.error.message } })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_error_reply_keeps_identifiers() {
        // ---
        let env = Envelope::new("add", 9, json!({"a": 1}))
            .with_timestamp(5u64)
            .with_field("bid", json!("b-1"));

        let reply = env.clone().into_error_reply("boom");

        assert_eq!(reply.method, env.method);
        assert_eq!(reply.tid, env.tid);
        assert_eq!(reply.timestamp, env.timestamp);
        assert_eq!(reply.extra, env.extra);
        assert_eq!(reply.error_message(), Some("boom"));
    }

    #[test]
    fn test_error_message_absent() {
        // ---
        let env = Envelope::new("add", 1, json!({"sum": 3}));
        assert_eq!(env.error_message(), None);

        let env = Envelope::new("add", 1, json!({"error": "not an object"}));
        assert_eq!(env.error_message(), None);
    }

    #[test]
    fn test_error_payload_shape() {
        // ---
        let value = ErrorPayload::new("x").into_value();
        assert_eq!(value, json!({"error": {"message": "x"}}));
        let back: ErrorPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, ErrorPayload::new("x"));
    }
}

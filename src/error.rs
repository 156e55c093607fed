use std::time::Duration;

use thiserror::Error;

use crate::TransactionId;

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// Transport could not be reached while constructing an engine.
    ///
    /// Fatal; there is no built-in retry.
    #[error("connection error: {0}")]
    Connection(String),

    /// Inbound bytes were not a well-formed envelope.
    #[error("decode error: {0}")]
    Decode(String),

    /// The `(method, tid)` pair is already waiting for a reply.
    #[error("transaction {tid} is already in flight for method {method}")]
    DuplicateTransaction {
        /// Method of the rejected call.
        method: String,
        /// Transaction id of the rejected call.
        tid: TransactionId,
    },

    /// No reply arrived within the configured window.
    #[error("rpc timed out: method {method}, tid {tid}, waited {waited:?}")]
    Timeout {
        /// Method of the timed-out call.
        method: String,
        /// Transaction id of the timed-out call.
        tid: TransactionId,
        /// Timestamp carried by the request envelope, if any.
        timestamp: Option<serde_json::Number>,
        /// Configured wait duration.
        waited: Duration,
    },

    /// The pending call was cancelled while it was being awaited.
    #[error("rpc cancelled: method {method}, tid {tid}")]
    Cancelled {
        /// Method of the cancelled call.
        method: String,
        /// Transaction id of the cancelled call.
        tid: TransactionId,
    },

    /// Outbound envelope failed validation.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic transport failure (publish, subscribe, closed channel).
    #[error("transport error: {0}")]
    Transport(String),

    /// The callee replied with an error payload.
    #[error("remote error: {0}")]
    Remote(String),

    /// A handler failed while processing a request.
    #[error("handler error: {0}")]
    Handler(String),

    /// Required configuration value is missing.
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

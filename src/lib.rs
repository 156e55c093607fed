//! Request/reply RPC over publish/subscribe message buses.
//!
//! A caller publishes a JSON envelope (`method`, `tid`, optional `timestamp`,
//! `data`) to a request topic; a callee runs the handler registered for
//! `method` and publishes the envelope back to a reply topic with the result
//! in `data`. The caller matches replies to calls by `(method, tid)`.
//!
//! - [`RpcCaller`]: blocking-with-timeout [`call`](RpcCaller::call) and
//!   callback-style [`call_async`](RpcCaller::call_async)
//! - [`RpcCallee`]: handler registration and concurrent dispatch
//! - [`Transport`]: the bus seam; an in-memory hub is always available and
//!   MQTT is provided by the `transport_rumqttc` feature
//!
//! # Example
//!
//! ```
//! use pubsub_rpc::{create_memory_transport, Envelope, RpcCallee, RpcCaller, RpcConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> pubsub_rpc::Result<()> {
//! let config = RpcConfig::memory("/local/request", "/local/reply");
//!
//! let callee = RpcCallee::with_transport(create_memory_transport("callee").await?, config.clone()).await?;
//! callee.register_call("echo", |env| async move { Ok(env.data) });
//!
//! let caller = RpcCaller::with_transport(create_memory_transport("caller").await?, config).await?;
//! let reply = caller
//!     .call(Envelope::new("echo", 1, json!({"msg": "hi"})), Some(Duration::from_secs(1)))
//!     .await?;
//! assert_eq!(reply.data, json!({"msg": "hi"}));
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod client;
mod domain;
mod lifecycle;
mod protocol;
mod server;
mod transport;

mod rpc_config;

mod correlation;
mod error;

#[allow(unused_imports)]
pub(crate) use macros::{log_debug, log_error, log_info, log_trace, log_warn};

// Re-export main types
pub use client::{AsyncCall, PendingCalls, RpcCaller, Waiter};
pub use server::{DispatchTable, Handler, HandlerFuture, RpcCallee};

pub use lifecycle::EngineState;
pub use rpc_config::{RpcConfig, UnknownMethodPolicy};

pub use correlation::TransactionId;
pub use error::{Result, RpcError};

pub use protocol::{decode, encode, Envelope, ErrorDetail, ErrorPayload};

pub use transport::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};

#[cfg(feature = "transport_rumqttc")]
pub use transport::create_rumqttc_transport;

// --- public re-exports
pub use domain::{
    //
    Address,
    ConnectionState,
    Delivery,
    LinkSignal,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportPtr,
};

/// Create the transport selected by `config.transport_type`.
///
/// - `Some("memory")`: in-memory transport on the process-global hub, keyed
///   by `config.client_id`
/// - `Some("rumqttc")`: MQTT transport (requires `transport_rumqttc`)
/// - `None`: MQTT when `transport_rumqttc` is enabled, memory otherwise
///
/// # Errors
///
/// Returns [`RpcError::Transport`] for an unrecognized or disabled transport
/// type, and the factory's error otherwise.
pub async fn create_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    match config.transport_type.as_deref() {
        Some("memory") => create_memory_transport(&config.client_id).await,
        Some("rumqttc") => create_broker_transport(config).await,
        Some(other) => Err(RpcError::Transport(format!(
            "unrecognized transport_type: {other}, valid values: memory, rumqttc"
        ))),
        None => create_default_transport(config).await,
    }
}

#[cfg(feature = "transport_rumqttc")]
async fn create_broker_transport(config: &RpcConfig) -> Result<TransportPtr> {
    create_rumqttc_transport(config).await
}

#[cfg(not(feature = "transport_rumqttc"))]
async fn create_broker_transport(_config: &RpcConfig) -> Result<TransportPtr> {
    Err(RpcError::Transport(
        "transport_type rumqttc requires the transport_rumqttc feature".into(),
    ))
}

#[cfg(feature = "transport_rumqttc")]
async fn create_default_transport(config: &RpcConfig) -> Result<TransportPtr> {
    create_rumqttc_transport(config).await
}

#[cfg(not(feature = "transport_rumqttc"))]
async fn create_default_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    log_warn!("no broker transport compiled in, using the in-memory transport");
    create_memory_transport(&config.client_id).await
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_create_transport_memory() {
        // ---
        let config = RpcConfig::memory("req", "rep").with_client_id("factory-memory");
        let transport = create_transport(&config).await.unwrap();
        assert_eq!(transport.transport_id(), "factory-memory");
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_transport_unknown_type() {
        // ---
        let config = RpcConfig::memory("req", "rep").with_transport_type("carrier-pigeon");
        let err = create_transport(&config).await.err().unwrap();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[cfg(not(feature = "transport_rumqttc"))]
    #[tokio::test]
    async fn test_create_transport_disabled_broker() {
        // ---
        let config = RpcConfig::memory("req", "rep").with_transport_type("rumqttc");
        let err = create_transport(&config).await.err().unwrap();
        assert!(matches!(err, RpcError::Transport(_)));
    }
}

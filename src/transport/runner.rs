//! Transport execution runner.
//!
//! This module provides the glue between a [`Transport`](crate::Transport)
//! implementation and the engine roles (caller reply loop, callee request
//! loop).
//!
//! The runner is responsible for:
//! - subscribing to a transport using a consumer-provided [`Subscription`]
//! - driving a receive loop over the transport inbox
//! - dispatching received [`Delivery`]s to the consumer
//! - consolidating logging and error handling for inbound messages
//!
//! It does **not** define RPC semantics or impose timeout policies.
//!
//! ### Error handling
//!
//! Errors returned by [`TransportConsumer::handle_delivery`] are best-effort
//! failures: they are logged and the loop continues with subsequent
//! messages. A malformed message must never bring down the delivery path
//! shared by every pending call.

use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_trace,
    log_warn,
    Delivery,
    Result,
    Subscription,
    TransportPtr,
};

/// A consumer of transport-delivered payloads.
///
/// Implementations should assume:
/// - deliveries may arrive out of order
/// - deliveries may be duplicated (depending on transport)
/// - delivery is best-effort
#[async_trait::async_trait]
pub(crate) trait TransportConsumer: Send + Sync {
    /// Return the subscription used to receive incoming payloads.
    fn subscription(&self) -> Subscription;

    /// Handle a single incoming delivery.
    ///
    /// Returning an error does not terminate the receive loop.
    async fn handle_delivery(&self, delivery: Delivery) -> Result<()>;
}

/// Subscribe and start a receive loop for a given consumer.
///
/// Returns once the subscription is established, so callers can treat the
/// consumer as live from that point. The returned [`JoinHandle`] completes
/// when the transport closes or the subscription is dropped.
///
/// # Errors
///
/// Returns the transport's error if the subscription cannot be established.
pub(crate) async fn run<T>(transport: TransportPtr, consumer: T) -> Result<JoinHandle<()>>
where
    T: TransportConsumer + 'static,
{
    // ---
    let sub = consumer.subscription();
    let mut handle = transport.subscribe(sub.clone()).await?;
    let _transport_id = transport.transport_id().to_string();

    let join = tokio::spawn(async move {
        // ---
        while let Some(delivery) = handle.inbox.recv().await {
            log_trace!("{_transport_id}: {} bytes on {}", delivery.payload.len(), delivery.topic);
            if let Err(_err) = consumer.handle_delivery(delivery).await {
                log_warn!("{_transport_id}: dropped message on {sub:?}: {_err}");
            }
        }
        log_debug!("{_transport_id}: receive loop for {sub:?} stopped");
    });

    Ok(join)
}

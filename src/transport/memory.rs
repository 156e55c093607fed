//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory transport defines the **reference behavior** for the transport
//! layer. All other transport implementations are expected to approximate this
//! behavior as closely as their underlying systems allow and to document any
//! unavoidable deviations.
//!
//! - Once `subscribe()` returns successfully, messages published *after* that
//!   point and matching the subscription are deliverable.
//! - Subscriptions match topics by exact string equality.
//! - A partitioned transport (see [`MemoryHub::partition`]) reports
//!   `Disconnected`, and its publishes and deliveries are silently dropped
//!   until healed.
//!
//! ## Non-Goals
//!
//! This transport does not attempt to emulate the failure modes, persistence,
//! or delivery guarantees of any specific broker.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    Address,
    ConnectionState,
    Delivery,
    LinkSignal,
    Result,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportPtr,
};

const INBOX_CAPACITY: usize = 64;

struct Subscriber {
    owner: String,
    tx: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct HubState {
    subscriptions: HashMap<Subscription, Vec<Subscriber>>,
    links: HashMap<String, LinkSignal>,
    partitioned: HashSet<String>,
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a message broker within a single process. All transports that
/// share a `MemoryHub` can publish and receive each other's messages, exactly
/// as nodes connected to a real broker would.
///
/// For tests that need isolation between parallel cases, construct a hub
/// explicitly and pass it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use pubsub_rpc::{create_memory_transport_with_hub, MemoryHub};
/// # async fn example() -> pubsub_rpc::Result<()> {
/// let hub = MemoryHub::new();
/// let caller_side = create_memory_transport_with_hub("caller", hub.clone()).await?;
/// let callee_side = create_memory_transport_with_hub("callee", hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryHub {
    // ---
    state: RwLock<HubState>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    /// Simulate a link loss for the transport with the given id.
    ///
    /// The transport reports `Disconnected`; messages it publishes and
    /// messages addressed to its subscriptions are dropped.
    pub async fn partition(&self, transport_id: &str) {
        // ---
        let mut state = self.state.write().await;
        state.partitioned.insert(transport_id.to_string());
        if let Some(link) = state.links.get(transport_id) {
            link.set(ConnectionState::Disconnected);
        }
    }

    /// Restore a partitioned transport; its subscriptions become live again.
    pub async fn heal(&self, transport_id: &str) {
        // ---
        let mut state = self.state.write().await;
        state.partitioned.remove(transport_id);
        if let Some(link) = state.links.get(transport_id) {
            link.set(ConnectionState::Connected);
        }
    }

    async fn attach(&self, transport_id: &str, link: LinkSignal) {
        // ---
        let mut state = self.state.write().await;
        state.links.insert(transport_id.to_string(), link);
    }

    async fn publish(&self, transport_id: &str, topic: &Address, payload: Bytes) -> Result<()> {
        // ---
        let targets: Vec<mpsc::Sender<Delivery>> = {
            let state = self.state.read().await;

            if state.partitioned.contains(transport_id) {
                log_debug!("{transport_id}: partitioned, dropping publish to {topic}");
                return Ok(());
            }

            let key = Subscription(topic.0.clone());
            state
                .subscriptions
                .get(&key)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| !state.partitioned.contains(&s.owner))
                        .map(|s| s.tx.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        log_debug!("{transport_id}: publish to {topic} ({} subscribers)", targets.len());

        let delivery = Delivery {
            topic: topic.clone(),
            payload,
        };

        for tx in targets {
            // Ignore send failures; a closed channel indicates
            // a dropped SubscriptionHandle.
            let _ = tx.send(delivery.clone()).await;
        }

        Ok(())
    }

    async fn subscribe(&self, transport_id: &str, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        log_debug!("{transport_id}: subscribe to {sub:?}");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut state = self.state.write().await;
        state.subscriptions.entry(sub).or_default().push(Subscriber {
            owner: transport_id.to_string(),
            tx,
        });

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self, transport_id: &str) {
        // ---
        log_debug!("{transport_id}: closing transport...");

        let mut state = self.state.write().await;
        for subs in state.subscriptions.values_mut() {
            subs.retain(|s| s.owner != transport_id);
        }
        state.subscriptions.retain(|_, subs| !subs.is_empty());
        state.links.remove(transport_id);
        state.partitioned.remove(transport_id);
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes messages through a shared [`MemoryHub`].
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, topic: &Address, payload: Bytes) -> Result<()> {
        // ---
        if self.base.link.get() == ConnectionState::Closed {
            return Err(RpcError::Transport(format!(
                "{}: publish on closed transport",
                self.transport_id()
            )));
        }
        self.hub.publish(self.transport_id(), topic, payload).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        if self.base.link.get() == ConnectionState::Closed {
            return Err(RpcError::Transport(format!(
                "{}: subscribe on closed transport",
                self.transport_id()
            )));
        }
        self.hub.subscribe(self.transport_id(), sub).await
    }

    /// Close the transport.
    ///
    /// Removes only this transport's subscriptions from the shared hub, which
    /// ends the receive loops reading them.
    async fn close(&self) -> Result<()> {
        // ---
        if self.base.link.get() == ConnectionState::Closed {
            return Ok(());
        }
        self.base.link.set(ConnectionState::Closed);
        self.hub.close(self.transport_id()).await;
        Ok(())
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// All transports created with this function share a single message bus.
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(transport_id: &str) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(transport_id, global_hub()).await
}

/// Create a new in-memory transport using the provided hub.
///
/// Transport ids must be unique within a hub; they key partitioning and
/// subscription ownership.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    transport_id: &str,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{transport_id}: create memory transport");

    let base = TransportBase::new(transport_id, ConnectionState::Connected);
    hub.attach(transport_id, base.link.clone()).await;

    Ok(Arc::new(MemoryTransport { base, hub }))
}

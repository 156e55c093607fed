// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the domain-level bus interface used by the caller and
//! callee engines to exchange messages. It intentionally avoids any reference
//! to concrete protocols, brokers, or client libraries.
//!
//! The transport layer is responsible only for delivering opaque payload
//! bytes to subscribed consumers. RPC envelopes, correlation, timeouts and
//! handler dispatch are handled elsewhere.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use crate::Result;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

/// Link state of a transport, as observed by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    // ---
    /// Link not yet established.
    Connecting,

    /// Link up; subscriptions are (re-)established by the transport.
    Connected,

    /// Link lost; the transport may reconnect on its own.
    Disconnected,

    /// Transport closed by its owner; terminal.
    Closed,
}

/// Shared, cloneable link-state signal.
///
/// Owned by a transport's [`TransportBase`]; clones let helpers outside the
/// transport (an actor task, a test hub) drive the same signal.
#[derive(Clone)]
pub struct LinkSignal(Arc<watch::Sender<ConnectionState>>);

impl LinkSignal {
    /// Create a signal in the given initial state.
    pub fn new(initial: ConnectionState) -> Self {
        // ---
        let (tx, _) = watch::channel(initial);
        Self(Arc::new(tx))
    }

    /// Publish a new link state to all observers.
    ///
    /// `Closed` is terminal; later updates are ignored.
    pub fn set(&self, next: ConnectionState) {
        // ---
        self.0.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Current link state.
    pub fn get(&self) -> ConnectionState {
        *self.0.borrow()
    }

    /// Subscribe to link state changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }
}

/// Shared base state for all transport implementations.
///
/// Embeds common fields so that default `Transport` trait implementations
/// can delegate to this struct rather than repeating logic in each transport.
///
/// # Usage
///
/// Each concrete transport embeds this as a field named `base`:
///
/// ```ignore
/// struct MqttTransport {
///     base: TransportBase,
///     // ... mqtt specific fields
/// }
///
/// impl Transport for MqttTransport {
///     fn base(&self) -> &TransportBase { &self.base }
/// }
/// ```
pub struct TransportBase {
    /// Unique identifier for this transport instance, used for logging.
    pub transport_id: String,
    /// Link state observed by the engines.
    pub link: LinkSignal,
}

impl TransportBase {
    /// Create a new TransportBase in the given initial state.
    pub fn new(transport_id: impl Into<String>, initial: ConnectionState) -> Self {
        // ---
        Self {
            transport_id: transport_id.into(),
            link: LinkSignal::new(initial),
        }
    }
}

/// A transport address (topic).
///
/// Its interpretation is transport-specific (e.g. MQTT topic), but it is
/// treated as an opaque identifier at the domain level.
///
/// Addresses are immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscription identifier.
///
/// How a subscription matches an address is defined by the transport
/// implementation. The in-memory transport provides the reference semantics
/// (exact match).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub Arc<str>);

impl From<Address> for Subscription {
    fn from(address: Address) -> Self {
        // ---
        Subscription(address.0)
    }
}

impl<T> From<T> for Subscription
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Subscription(value.into())
    }
}

/// A message delivered to a subscriber.
#[derive(Clone, Debug)]
pub struct Delivery {
    // ---
    /// Topic the message was published to.
    pub topic: Address,

    /// Opaque payload bytes.
    pub payload: Bytes,
}

/// Handle returned from a successful subscription.
///
/// The subscription remains active until either:
/// - The handle is dropped (receiver channel closes)
/// - The transport is closed
///
/// # Example
///
/// ```
/// # use pubsub_rpc::{create_memory_transport, Address, Subscription};
/// # async fn example() -> pubsub_rpc::Result<()> {
/// let transport = create_memory_transport("app").await?;
/// let mut handle = transport.subscribe(Subscription::from("notifications")).await?;
///
/// transport.publish(&Address::from("notifications"), "hello".into()).await?;
///
/// if let Some(delivery) = handle.inbox.recv().await {
///     assert_eq!(&delivery.payload[..], b"hello");
/// }
/// # Ok(())
/// # }
/// ```
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for deliveries matching this subscription.
    pub inbox: mpsc::Receiver<Delivery>,
}

/// Transport abstraction.
///
/// A `Transport` provides best-effort delivery of payload bytes between
/// publishers and subscribers. It defines the minimal contract required by
/// the engines without committing to any specific protocol or broker.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, messages published *after* that
///   point and matching the subscription are deliverable.
/// - `publish()` is accepted while the link is down (best-effort; it may be
///   dropped or queued) and never panics.
/// - Subscriptions survive a reconnect.
/// - `close()` is idempotent.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// Subscribe to link state changes.
    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.base().link.watch()
    }

    /// Publish payload bytes to the given topic.
    async fn publish(&self, topic: &Address, payload: Bytes) -> Result<()>;

    /// Register a subscription and return a handle for receiving messages.
    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// Cheap to clone; clones share the same underlying connection.
pub type TransportPtr = Arc<dyn Transport>;

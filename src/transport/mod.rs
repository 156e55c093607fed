//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait. Broker-backed transports sit behind feature flags
//! and are exposed only through constructor functions.
//!
//! Engine code must not depend on transport-specific types.

mod memory;
pub(crate) mod runner;

#[cfg(feature = "transport_rumqttc")]
mod rumqttc;

#[cfg(feature = "transport_rumqttc")]
pub use rumqttc::create_transport as create_rumqttc_transport;

pub use memory::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};

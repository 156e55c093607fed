//! MQTT transport implementation based on rumqttc.
//!
//! This module adapts the rumqttc API to the domain-level `Transport` trait
//! without leaking MQTT concepts upward.
//!
//! # Features
//!
//! - Actor-based concurrency model with single EventLoop ownership
//! - Blocking connect: creation returns only after the first CONNACK
//! - SUBACK confirmation before returning from subscribe()
//! - Reconnect with automatic resubscription, reported through the link signal
//!
//! # Usage
//!
//! Enable the `transport_rumqttc` feature in your Cargo.toml:
//!
//! ```toml
//! [dependencies]
//! pubsub-rpc = { version = "0.1", features = ["transport_rumqttc"] }
//! ```

mod transport;
pub use transport::create_transport;

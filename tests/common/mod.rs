// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::{Arc, Once};

use pubsub_rpc::{
    // ---
    create_memory_transport_with_hub,
    MemoryHub,
    RpcCallee,
    RpcCaller,
    RpcConfig,
    TransportPtr,
};

pub const REQUEST_TOPIC: &str = "/local/request";
pub const REPLY_TOPIC: &str = "/local/reply";

static INIT: Once = Once::new();

/// Route crate logs to the test output (`RUST_LOG=debug cargo test`).
pub fn init_logging() {
    // ---
    #[cfg(feature = "logging")]
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn config() -> RpcConfig {
    RpcConfig::memory(REQUEST_TOPIC, REPLY_TOPIC)
}

/// A caller and a callee sharing a private hub.
pub struct Pair {
    pub hub: Arc<MemoryHub>,
    pub caller: RpcCaller,
    pub callee: RpcCallee,
}

impl Pair {
    pub async fn new() -> Self {
        Self::with_config(config()).await
    }

    pub async fn with_config(config: RpcConfig) -> Self {
        // ---
        init_logging();
        let hub = MemoryHub::new();

        let callee_side = create_memory_transport_with_hub("callee", hub.clone())
            .await
            .expect("callee transport");
        let callee = RpcCallee::with_transport(callee_side, config.clone())
            .await
            .expect("callee up");

        let caller_side = create_memory_transport_with_hub("caller", hub.clone())
            .await
            .expect("caller transport");
        let caller = RpcCaller::with_transport(caller_side, config)
            .await
            .expect("caller up");

        Self { hub, caller, callee }
    }

    /// A raw transport on the same hub, for injecting traffic.
    pub async fn raw(&self, id: &str) -> TransportPtr {
        create_memory_transport_with_hub(id, self.hub.clone())
            .await
            .expect("raw transport")
    }
}

/// A caller with no callee on its hub.
pub async fn lone_caller(config: RpcConfig) -> (Arc<MemoryHub>, RpcCaller) {
    // ---
    init_logging();
    let hub = MemoryHub::new();
    let transport = create_memory_transport_with_hub("caller", hub.clone())
        .await
        .expect("caller transport");
    let caller = RpcCaller::with_transport(transport, config)
        .await
        .expect("caller up");
    (hub, caller)
}

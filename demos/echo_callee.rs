//! Echo callee over an MQTT broker.
//!
//! Run with: cargo run --example echo_callee --features transport_rumqttc
//!
//! Requires an MQTT broker (see `BROKER_HOST`/`BROKER_PORT`, default
//! localhost:1883). Pair with the `echo_caller` example.

mod common;

use pubsub_rpc::{Result, RpcCallee, RpcError};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    common::init_tracing();

    let callee = RpcCallee::connect(common::broker_config("echo-callee")).await?;

    callee.register_call("echo", |env| async move { Ok(env.data) });
    callee.register_call("uptime", |_env| async {
        Ok(json!({ "pid": std::process::id() }))
    });
    callee.register_call("fail", |_env| async {
        Err(RpcError::Handler("this method always fails".into()))
    });

    let serving = callee.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = serving.shutdown().await;
        }
    });

    println!("echo callee ready on {}", common::REQUEST_TOPIC);
    callee.run().await
}

//! Echo caller over an MQTT broker.
//!
//! Run with: cargo run --example echo_caller --features transport_rumqttc
//!
//! Requires an MQTT broker and the `echo_callee` example running.

mod common;

use std::time::Duration;

use pubsub_rpc::{Envelope, Result, RpcCaller, TransactionId};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    common::init_tracing();

    let config = common::broker_config("echo-caller").with_request_timeout(Duration::from_secs(3));
    let caller = RpcCaller::connect(config).await?;

    for n in 0..3 {
        let request = Envelope::new("echo", TransactionId::generate(), json!({ "n": n }));
        match caller.call_default(request).await {
            Ok(reply) => println!("echo {} -> {}", reply.tid, reply.data),
            Err(err) => eprintln!("echo failed: {err}"),
        }
    }

    let reply = caller.call_default(Envelope::new("fail", 100, json!({}))).await?;
    println!("fail -> {:?}", reply.error_message());

    caller.close().await
}

//! Caller and callee in one process over the in-memory transport.
//!
//! Run with: RUST_LOG=debug cargo run --example echo_memory

mod common;

use std::time::Duration;

use pubsub_rpc::{
    //
    create_memory_transport,
    Envelope,
    Result,
    RpcCallee,
    RpcCaller,
    RpcConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use common::{REPLY_TOPIC, REQUEST_TOPIC};

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i64,
    b: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddResponse {
    sum: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    common::init_tracing();

    let config = RpcConfig::memory(REQUEST_TOPIC, REPLY_TOPIC)
        .with_request_timeout(Duration::from_secs(2))
        .with_async_timeout(Duration::from_secs(2));

    let callee =
        RpcCallee::with_transport(create_memory_transport("echo-callee").await?, config.clone())
            .await?;
    callee.register_call("echo", |env| async move { Ok(env.data) });
    callee.register_typed("add", |req: AddRequest| async move {
        Ok(AddResponse { sum: req.a + req.b })
    });

    let caller = RpcCaller::with_transport(create_memory_transport("echo-caller").await?, config).await?;

    let reply = caller
        .call_default(Envelope::new("echo", 1, json!({"msg": "hello"})).with_timestamp(1u64))
        .await?;
    println!("echo -> {}", reply.data);

    let resp: AddResponse = caller
        .request("add", 2, AddRequest { a: 20, b: 3 }, Some(Duration::from_secs(2)))
        .await?;
    println!("20 + 3 = {}", resp.sum);

    // No handler: the request comes back as is.
    let reply = caller
        .call_default(Envelope::new("ping", 3, json!("unhandled")))
        .await?;
    println!("ping -> {}", reply.data);

    let pending = caller
        .call_async(Envelope::new("echo", 4, json!("async")), |result| match result {
            Ok(reply) => println!("async echo -> {}", reply.data),
            Err(err) => eprintln!("async echo failed: {err}"),
        })
        .await?;
    pending.join().await?;

    caller.close().await?;
    callee.shutdown().await?;
    Ok(())
}

// tests/integration.rs

mod common;

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinSet;

use pubsub_rpc::{
    // ---
    create_memory_transport_with_hub,
    Address,
    EngineState,
    Envelope,
    MemoryHub,
    RpcCallee,
    RpcCaller,
    RpcError,
    Subscription,
    TransactionId,
    UnknownMethodPolicy,
};

use common::{config, lone_caller, Pair, REPLY_TOPIC, REQUEST_TOPIC};

const WAIT: Option<Duration> = Some(Duration::from_secs(2));

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i64,
    b: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct AddResponse {
    sum: i64,
}

#[tokio::test]
async fn call_returns_handler_result() {
    // ---
    // Arrange
    // ---
    let pair = Pair::new().await;
    pair.callee.register_call("echo", |env| async move { Ok(env.data) });

    let request = Envelope::new("echo", 1, json!({"msg": "hi"}))
        .with_timestamp(1_700_000_000_000u64)
        .with_field("bid", json!("b-7"));

    // ---
    // Act
    // ---
    let reply = pair.caller.call(request.clone(), WAIT).await.expect("reply");

    // ---
    // Assert
    // ---
    assert_eq!(reply, request);
    assert!(pair.caller.pending_calls().is_empty());
}

#[tokio::test]
async fn typed_request_round_trip() {
    // ---
    let pair = Pair::new().await;
    pair.callee
        .register_typed("add", |req: AddRequest| async move {
            Ok(AddResponse { sum: req.a + req.b })
        });

    let resp: AddResponse = pair
        .caller
        .request("add", 10, AddRequest { a: 2, b: 40 }, WAIT)
        .await
        .expect("typed reply");

    assert_eq!(resp, AddResponse { sum: 42 });
}

#[tokio::test]
async fn unregistered_method_is_echoed() {
    // ---
    let pair = Pair::new().await;
    let request = Envelope::new("nobody_home", "t-1", json!({"x": 1}));

    let reply = pair.caller.call(request.clone(), WAIT).await.expect("echo");

    assert_eq!(reply, request);
}

#[tokio::test]
async fn unregistered_method_rejected_by_policy() {
    // ---
    let pair = Pair::with_config(config().with_unknown_method(UnknownMethodPolicy::Reject)).await;

    let reply = pair
        .caller
        .call(Envelope::new("nobody_home", 3, json!({"x": 1})), WAIT)
        .await
        .expect("reply");
    assert_eq!(reply.error_message(), Some("unknown method: nobody_home"));

    let err = pair
        .caller
        .request::<_, Value>("nobody_home", 4, json!({}), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(msg) if msg == "unknown method: nobody_home"));
}

#[tokio::test]
async fn concurrent_calls_resolve_out_of_order() {
    // ---
    // Arrange: later tids answer first.
    // ---
    let pair = Pair::new().await;
    pair.callee.register_call("slow_echo", |env| async move {
        let delay = 200 - env.data["n"].as_u64().unwrap_or(0) * 20;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(env.data)
    });

    // ---
    // Act
    // ---
    let mut calls = JoinSet::new();
    for n in 0..8u64 {
        let caller = pair.caller.clone();
        calls.spawn(async move {
            let reply = caller
                .call(Envelope::new("slow_echo", n as i64, json!({ "n": n })), WAIT)
                .await
                .expect("reply");
            (n, reply)
        });
    }

    // ---
    // Assert: each call got its own reply.
    // ---
    let mut seen = Vec::new();
    while let Some(joined) = calls.join_next().await {
        let (n, reply) = joined.expect("call task");
        assert_eq!(reply.tid, TransactionId::from(n as i64));
        assert_eq!(reply.data, json!({ "n": n }));
        seen.push(n);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..8).collect::<Vec<_>>());
    assert!(pair.caller.pending_calls().is_empty());
}

#[tokio::test]
async fn same_tid_under_different_methods_is_independent() {
    // ---
    let pair = Pair::new().await;
    pair.callee.register_call("a", |_env| async { Ok(json!("from a")) });
    pair.callee.register_call("b", |_env| async { Ok(json!("from b")) });

    let (ra, rb) = tokio::join!(
        pair.caller.call(Envelope::new("a", 1, Value::Null), WAIT),
        pair.caller.call(Envelope::new("b", 1, Value::Null), WAIT),
    );

    assert_eq!(ra.expect("a").data, json!("from a"));
    assert_eq!(rb.expect("b").data, json!("from b"));
}

#[tokio::test]
async fn unmatched_reply_is_dropped() {
    // ---
    let pair = Pair::new().await;
    pair.callee.register_call("echo", |env| async move { Ok(env.data) });
    let raw = pair.raw("stranger").await;

    let stray = pubsub_rpc::encode(&Envelope::new("echo", 999, json!("stray"))).expect("encode");
    raw.publish(&Address::from(REPLY_TOPIC), stray).await.expect("publish");
    raw.publish(&Address::from(REPLY_TOPIC), Bytes::from_static(b"{not json"))
        .await
        .expect("publish");

    let reply = pair
        .caller
        .call(Envelope::new("echo", 1, json!("real")), WAIT)
        .await
        .expect("reply");

    assert_eq!(reply.data, json!("real"));
    assert!(pair.caller.pending_calls().is_empty());
}

#[tokio::test]
async fn numeric_tids_outside_i64_are_correlated() {
    // ---
    // Arrange
    // ---
    let pair = Pair::new().await;
    pair.callee.register_call("echo", |env| async move { Ok(env.data) });
    let raw = pair.raw("wide-peer").await;
    let mut replies = raw
        .subscribe(Subscription::from(REPLY_TOPIC))
        .await
        .expect("subscribe");

    // ---
    // Act
    // ---
    raw.publish(
        &Address::from(REQUEST_TOPIC),
        Bytes::from_static(br#"{"method":"echo","tid":9223372036854775808,"data":"wide"}"#),
    )
    .await
    .expect("publish");

    let wide = pair
        .caller
        .call(Envelope::new("echo", u64::MAX, json!("max")), WAIT)
        .await
        .expect("reply");
    let fractional = pair
        .caller
        .call(
            Envelope::new("echo", TransactionId::Num("1.5".into()), json!("half")),
            WAIT,
        )
        .await
        .expect("reply");

    // ---
    // Assert
    // ---
    // The raw peer also sees the caller's replies; pick out its own.
    let raw_reply = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let delivered = replies.inbox.recv().await.expect("reply channel open");
            let reply: Value = serde_json::from_slice(&delivered.payload).expect("json");
            if reply["tid"] == json!(9_223_372_036_854_775_808u64) {
                break reply;
            }
        }
    })
    .await
    .expect("reply to raw request");
    assert_eq!(raw_reply["data"], json!("wide"));

    assert_eq!(wide.tid, TransactionId::UInt(u64::MAX));
    assert_eq!(wide.data, json!("max"));
    assert_eq!(fractional.data, json!("half"));
    assert!(pair.caller.pending_calls().is_empty());
}

#[tokio::test]
async fn duplicate_reply_is_observed_once() {
    // ---
    // Arrange: a hand-rolled callee that answers every request twice.
    // ---
    common::init_logging();
    let hub = MemoryHub::new();
    let responder = create_memory_transport_with_hub("twice", hub.clone())
        .await
        .expect("transport");
    let mut requests = responder
        .subscribe(Subscription::from(REQUEST_TOPIC))
        .await
        .expect("subscribe");

    let responder_task = tokio::spawn(async move {
        while let Some(delivery) = requests.inbox.recv().await {
            let reply_topic = Address::from(REPLY_TOPIC);
            for n in 0..2 {
                let mut env = pubsub_rpc::decode(&delivery.payload).expect("decode");
                env.data = json!({ "copy": n });
                let bytes = pubsub_rpc::encode(&env).expect("encode");
                responder.publish(&reply_topic, bytes).await.expect("publish");
            }
        }
    });

    let transport = create_memory_transport_with_hub("caller", hub.clone())
        .await
        .expect("transport");
    let caller = RpcCaller::with_transport(transport, config()).await.expect("caller");

    // ---
    // Act
    // ---
    let reply = caller.call(Envelope::new("x", 1, Value::Null), WAIT).await.expect("reply");

    // ---
    // Assert
    // ---
    assert_eq!(reply.data, json!({"copy": 0}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(caller.pending_calls().is_empty());

    responder_task.abort();
}

#[tokio::test]
async fn timeout_releases_slot_for_reuse() {
    // ---
    let (hub, caller) = lone_caller(config()).await;
    let request = Envelope::new("add", 7, json!({"a": 1, "b": 2})).with_timestamp(123u64);

    let started = Instant::now();
    let err = caller
        .call(request.clone(), Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100), "failed early after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "failed late after {elapsed:?}");

    match err {
        RpcError::Timeout {
            method,
            tid,
            timestamp,
            waited,
        } => {
            assert_eq!(method, "add");
            assert_eq!(tid, TransactionId::from(7));
            assert_eq!(timestamp, Some(123u64.into()));
            assert_eq!(waited, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {other}"),
    }
    assert!(caller.pending_calls().is_empty());

    // A callee shows up; the same (method, tid) is usable again.
    let callee_side = create_memory_transport_with_hub("callee", hub.clone())
        .await
        .expect("transport");
    let callee = RpcCallee::with_transport(callee_side, config()).await.expect("callee");
    callee.register_call("add", |env| async move {
        let sum = env.data["a"].as_i64().unwrap_or(0) + env.data["b"].as_i64().unwrap_or(0);
        Ok(json!({ "sum": sum }))
    });

    let reply = caller.call(request, WAIT).await.expect("reply");
    assert_eq!(reply.data, json!({"sum": 3}));
}

#[tokio::test]
async fn dropped_call_future_leaves_no_entry() {
    // ---
    let (_hub, caller) = lone_caller(config()).await;

    let outer = tokio::time::timeout(
        Duration::from_millis(50),
        caller.call(Envelope::new("never", 1, Value::Null), None),
    )
    .await;

    assert!(outer.is_err());
    assert!(caller.pending_calls().is_empty());
}

#[tokio::test]
async fn duplicate_in_flight_tid_fails_fast() {
    // ---
    let (hub, caller) = lone_caller(config()).await;
    let raw = create_memory_transport_with_hub("observer", hub.clone())
        .await
        .expect("transport");
    let mut observed = raw
        .subscribe(Subscription::from(REQUEST_TOPIC))
        .await
        .expect("subscribe");

    let first = caller
        .call_async(Envelope::new("m", 5, Value::Null), |_result| {})
        .await
        .expect("first");
    observed.inbox.recv().await.expect("first request published");

    let err = caller
        .call(Envelope::new("m", 5, Value::Null), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::DuplicateTransaction { .. }));

    // Nothing was published for the rejected call.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observed.inbox.try_recv().is_err());

    assert!(first.cancel());
    first.join().await.expect("callback");
}

#[tokio::test]
async fn empty_method_is_rejected() {
    // ---
    let (_hub, caller) = lone_caller(config()).await;

    let err = caller
        .call(Envelope::new("", 1, Value::Null), WAIT)
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::InvalidEnvelope(_)));
    assert!(caller.pending_calls().is_empty());
}

#[tokio::test]
async fn handler_failures_do_not_stop_dispatch() {
    // ---
    // Arrange
    // ---
    let pair = Pair::new().await;
    pair.callee.register_call("fails", |_env| async {
        Err(RpcError::Handler("disk on fire".into()))
    });
    pair.callee.register_call("panics", |env| async move {
        if env.data.is_null() {
            panic!("handler bug");
        }
        Ok(env.data)
    });
    pair.callee.register_call("echo", |env| async move { Ok(env.data) });

    let raw = pair.raw("vandal").await;
    raw.publish(&Address::from(REQUEST_TOPIC), Bytes::from_static(b"garbage"))
        .await
        .expect("publish");

    // ---
    // Act
    // ---
    let failed = pair
        .caller
        .call(Envelope::new("fails", 1, json!({})), WAIT)
        .await
        .expect("error reply");
    let panicked = pair
        .caller
        .call(Envelope::new("panics", 2, Value::Null), WAIT)
        .await
        .expect("error reply");
    let fine = pair
        .caller
        .call(Envelope::new("echo", 3, json!("still here")), WAIT)
        .await
        .expect("reply");

    // ---
    // Assert
    // ---
    assert_eq!(failed.error_message(), Some("disk on fire"));
    assert_eq!(failed.method, "fails");
    assert_eq!(failed.tid, TransactionId::from(1));
    assert_eq!(panicked.error_message(), Some("handler panicked"));
    assert_eq!(fine.data, json!("still here"));
}

#[tokio::test]
async fn handler_mutation_does_not_affect_correlation() {
    // ---
    let pair = Pair::new().await;
    pair.callee.register_call("rename", |mut env| async move {
        env.method = "something_else".into();
        env.tid = TransactionId::from("hijacked");
        Ok(json!("done"))
    });

    let reply = pair
        .caller
        .call(Envelope::new("rename", 11, Value::Null), WAIT)
        .await
        .expect("reply");

    assert_eq!(reply.method, "rename");
    assert_eq!(reply.tid, TransactionId::from(11));
    assert_eq!(reply.data, json!("done"));
}

#[tokio::test]
async fn handlers_can_change_at_runtime() {
    // ---
    let pair = Pair::new().await;
    pair.callee.register_call("v", |_env| async { Ok(json!(1)) });
    assert!(pair.callee.has_handler("v"));

    let first = pair.caller.call(Envelope::new("v", 1, Value::Null), WAIT).await.expect("v1");
    pair.callee.register_call("v", |_env| async { Ok(json!(2)) });
    let second = pair.caller.call(Envelope::new("v", 2, Value::Null), WAIT).await.expect("v2");

    assert!(pair.callee.unregister_call("v"));
    let echoed = pair.caller.call(Envelope::new("v", 3, json!("raw")), WAIT).await.expect("echo");

    assert_eq!(first.data, json!(1));
    assert_eq!(second.data, json!(2));
    assert_eq!(echoed.data, json!("raw"));
}

#[tokio::test]
async fn link_loss_is_tolerated() {
    // ---
    // Arrange
    // ---
    let pair = Pair::new().await;
    pair.callee.register_call("echo", |env| async move { Ok(env.data) });
    let mut state = pair.caller.state();
    assert!(pair.caller.is_ready());

    // ---
    // Act: the caller loses its link.
    // ---
    pair.hub.partition("caller").await;
    state
        .wait_for(|s| *s == EngineState::Disconnected)
        .await
        .expect("state");

    let err = pair
        .caller
        .call(Envelope::new("echo", 1, json!("lost")), Some(Duration::from_millis(100)))
        .await
        .unwrap_err();

    pair.hub.heal("caller").await;
    state.wait_for(|s| *s == EngineState::Ready).await.expect("state");

    // ---
    // Assert
    // ---
    assert!(matches!(err, RpcError::Timeout { .. }));
    let reply = pair
        .caller
        .call(Envelope::new("echo", 2, json!("back")), WAIT)
        .await
        .expect("reply after heal");
    assert_eq!(reply.data, json!("back"));
    assert!(pair.callee.is_ready());
}

#[tokio::test]
async fn construction_fails_on_closed_transport() {
    // ---
    let hub = MemoryHub::new();
    let transport = create_memory_transport_with_hub("gone", hub)
        .await
        .expect("transport");
    transport.close().await.expect("close");

    let err = RpcCaller::with_transport(transport, config())
        .await
        .err()
        .expect("must fail");

    assert!(matches!(err, RpcError::Connection(_)));
}

#[tokio::test]
async fn construction_rejects_missing_topic() {
    // ---
    let hub = MemoryHub::new();
    let transport = create_memory_transport_with_hub("x", hub)
        .await
        .expect("transport");

    let err = RpcCallee::with_transport(transport, pubsub_rpc::RpcConfig::memory("", REPLY_TOPIC))
        .await
        .err()
        .expect("must fail");

    assert!(matches!(err, RpcError::MissingConfig(_)));
}

#[tokio::test]
async fn shutdown_ends_run() {
    // ---
    let pair = Pair::new().await;
    let callee = pair.callee.clone();
    let serving = tokio::spawn(async move { callee.run().await });

    pair.callee.shutdown().await.expect("shutdown");

    tokio::time::timeout(Duration::from_secs(1), serving)
        .await
        .expect("run returned")
        .expect("run task")
        .expect("run result");
    assert!(!pair.callee.is_ready());
}

// src/client/mod.rs
//! Caller engine.
//!
//! [`RpcCaller`] publishes request envelopes to the request topic and
//! resolves them from replies arriving on the reply topic.
//!
//! # Architecture
//!
//! Construction waits for the transport link, subscribes to the reply topic
//! and starts one receive loop. Every call registers a waiter in the
//! caller's own [`PendingCalls`] *before* publishing, so a reply can never
//! overtake its registration. The receive loop decodes each reply and
//! fulfills the matching `(method, tid)` slot; anything unmatched is dropped.
//!
//! # Concurrency
//!
//! Any number of calls may be in flight. [`call`](RpcCaller::call) suspends
//! only the task awaiting it; [`call_async`](RpcCaller::call_async) spawns one
//! task per call that waits and then runs the callback. Replies for
//! different transactions are delivered in whatever order they arrive.

mod pending;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use pending::{PendingCalls, Waiter};

use crate::lifecycle::{await_link, spawn_link_monitor, Readiness};
use crate::transport::runner::{self, TransportConsumer};
use crate::{
    // ---
    decode,
    encode,
    log_debug,
    log_info,
    log_trace,
    Address,
    Delivery,
    EngineState,
    Envelope,
    Result,
    RpcConfig,
    RpcError,
    Subscription,
    TransactionId,
    TransportPtr,
};

/// Running caller instance.
///
/// Cheap to clone (internally `Arc`-backed).
#[derive(Clone)]
pub struct RpcCaller {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    config: RpcConfig,
    request_topic: Address,
    pending: PendingCalls,
    readiness: Arc<Readiness>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // ---
        let tasks = match self.tasks.get_mut() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

struct ReplyConsumer {
    topic: Subscription,
    pending: PendingCalls,
}

#[async_trait::async_trait]
impl TransportConsumer for ReplyConsumer {
    fn subscription(&self) -> Subscription {
        self.topic.clone()
    }

    async fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        // ---
        let reply = decode(&delivery.payload)?;
        let method = reply.method.clone();
        let tid = reply.tid.clone();

        if !self.pending.fulfill(&method, &tid, reply) {
            log_debug!("unmatched reply dropped (method: {method}, tid: {tid})");
        }
        Ok(())
    }
}

/// Handle to one asynchronous call started by [`RpcCaller::call_async`].
///
/// Dropping the handle detaches the call; the callback still runs.
pub struct AsyncCall {
    method: String,
    tid: TransactionId,
    pending: PendingCalls,
    task: JoinHandle<()>,
}

impl AsyncCall {
    /// Method of the call.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Transaction id of the call.
    pub fn tid(&self) -> &TransactionId {
        &self.tid
    }

    /// Abandon the call. The callback receives [`RpcError::Cancelled`]
    /// unless the reply was already delivered.
    ///
    /// Returns `false` if the call was no longer registered.
    pub fn cancel(&self) -> bool {
        self.pending.cancel(&self.method, &self.tid)
    }

    /// Wait until the callback has run.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Handler`] if the callback panicked.
    pub async fn join(self) -> Result<()> {
        // ---
        self.task
            .await
            .map_err(|err| RpcError::Handler(format!("reply callback failed: {err}")))
    }
}

impl RpcCaller {
    // ---
    /// Create a caller over an explicitly provided transport.
    ///
    /// Returns once the reply subscription is live and the engine is
    /// [`EngineState::Ready`].
    ///
    /// # Errors
    ///
    /// - [`RpcError::MissingConfig`] if the config is incomplete
    /// - [`RpcError::Connection`] if the link is not up within
    ///   `config.connect_timeout`
    /// - the transport's error if the reply subscription fails
    pub async fn with_transport(transport: TransportPtr, config: RpcConfig) -> Result<Self> {
        // ---
        config.validate()?;

        let readiness = Arc::new(Readiness::new());
        readiness.set(EngineState::Connecting);
        await_link(&transport, config.connect_timeout).await?;

        readiness.set(EngineState::Subscribing);
        let pending = PendingCalls::new();
        let consumer = ReplyConsumer {
            topic: Subscription::from(config.reply_topic.as_str()),
            pending: pending.clone(),
        };
        let rx_task = runner::run(transport.clone(), consumer).await?;

        readiness.set(EngineState::Ready);
        let monitor = spawn_link_monitor(&transport, readiness.clone());

        log_info!(
            "{}: caller ready (request: {}, reply: {})",
            transport.transport_id(),
            config.request_topic,
            config.reply_topic
        );

        Ok(Self {
            inner: Arc::new(Inner {
                request_topic: Address::from(config.request_topic.as_str()),
                transport,
                config,
                pending,
                readiness,
                tasks: Mutex::new(vec![rx_task, monitor]),
            }),
        })
    }

    /// Create a caller over the transport selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns transport creation errors and everything
    /// [`with_transport`](Self::with_transport) returns.
    pub async fn connect(config: RpcConfig) -> Result<Self> {
        // ---
        let transport = crate::create_transport(&config).await?;
        Self::with_transport(transport, config).await
    }

    /// Publish `envelope` and wait for its reply.
    ///
    /// `timeout` of `None` waits indefinitely. The call's slot is released on
    /// every outcome, including when this future is dropped.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidEnvelope`] if the method is empty
    /// - [`RpcError::DuplicateTransaction`] if `(method, tid)` is already in
    ///   flight; nothing is published
    /// - [`RpcError::Timeout`] if no reply arrives in time
    /// - the transport's error if the publish fails
    pub async fn call(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<Envelope> {
        // ---
        let waiter = self.send(&envelope).await?;
        self.inner.pending.take(waiter, timeout).await
    }

    /// [`call`](Self::call) with the configured `request_timeout`.
    pub async fn call_default(&self, envelope: Envelope) -> Result<Envelope> {
        // ---
        self.call(envelope, self.inner.config.request_timeout).await
    }

    /// Typed call: `req` becomes `data`, the reply's `data` is decoded as
    /// `TResp`.
    ///
    /// # Errors
    ///
    /// Everything [`call`](Self::call) returns, plus
    /// [`RpcError::Remote`] when the callee replied with an error payload and
    /// [`RpcError::Serialization`] when either side does not fit its type.
    ///
    /// # Example
    ///
    /// ```
    /// # use pubsub_rpc::{RpcCaller, RpcCallee, RpcConfig, create_memory_transport};
    /// # use std::time::Duration;
    /// # async fn example() -> pubsub_rpc::Result<()> {
    /// let config = RpcConfig::memory("doc/request", "doc/reply");
    ///
    /// let callee = RpcCallee::with_transport(create_memory_transport("doc-callee").await?, config.clone()).await?;
    /// callee.register_typed("double", |n: i64| async move { Ok(n * 2) });
    ///
    /// let caller = RpcCaller::with_transport(create_memory_transport("doc-caller").await?, config).await?;
    /// let out: i64 = caller.request("double", 1, 21, Some(Duration::from_secs(1))).await?;
    /// assert_eq!(out, 42);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn request<TReq, TResp>(
        &self,
        method: &str,
        tid: impl Into<TransactionId>,
        req: TReq,
        timeout: Option<Duration>,
    ) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        let data = serde_json::to_value(req)?;
        let reply = self.call(Envelope::new(method, tid, data), timeout).await?;

        if let Some(message) = reply.error_message() {
            return Err(RpcError::Remote(message.to_string()));
        }
        Ok(serde_json::from_value(reply.data)?)
    }

    /// Publish `envelope` and hand the reply to `on_reply` on a background
    /// task, bounded by the configured `async_timeout`.
    ///
    /// `on_reply` runs exactly once, with the reply, [`RpcError::Timeout`] or
    /// [`RpcError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Registration and publish failures are returned here and `on_reply` is
    /// never invoked.
    pub async fn call_async<F>(&self, envelope: Envelope, on_reply: F) -> Result<AsyncCall>
    where
        F: FnOnce(Result<Envelope>) + Send + 'static,
    {
        // ---
        self.call_async_with_timeout(envelope, self.inner.config.async_timeout, on_reply)
            .await
    }

    /// [`call_async`](Self::call_async) with an explicit timeout.
    pub async fn call_async_with_timeout<F>(
        &self,
        envelope: Envelope,
        timeout: Option<Duration>,
        on_reply: F,
    ) -> Result<AsyncCall>
    where
        F: FnOnce(Result<Envelope>) + Send + 'static,
    {
        // ---
        let waiter = self.send(&envelope).await?;
        let pending = self.inner.pending.clone();

        let task = tokio::spawn(async move {
            // ---
            let result = pending.take(waiter, timeout).await;
            if let Err(_err) = &result {
                log_debug!("async call finished without reply: {_err}");
            }
            on_reply(result);
        });

        Ok(AsyncCall {
            method: envelope.method,
            tid: envelope.tid,
            pending: self.inner.pending.clone(),
            task,
        })
    }

    /// Validate, register and publish; the returned waiter owns the slot.
    async fn send(&self, envelope: &Envelope) -> Result<Waiter> {
        // ---
        if envelope.method.is_empty() {
            return Err(RpcError::InvalidEnvelope("method must not be empty".into()));
        }

        let waiter = self
            .inner
            .pending
            .register(&envelope.method, &envelope.tid)?
            .with_timestamp(envelope.timestamp.clone());

        let payload = encode(envelope)?;
        self.inner
            .transport
            .publish(&self.inner.request_topic, payload)
            .await?;
        log_trace!("request published (method: {}, tid: {})", waiter.method(), waiter.tid());

        Ok(waiter)
    }

    /// Subscribe to engine state changes.
    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.inner.readiness.watch()
    }

    /// Whether the engine is currently [`EngineState::Ready`].
    pub fn is_ready(&self) -> bool {
        self.inner.readiness.get() == EngineState::Ready
    }

    /// The caller's pending-call table.
    pub fn pending_calls(&self) -> &PendingCalls {
        &self.inner.pending
    }

    /// Stop receiving replies and close the transport.
    ///
    /// Calls still in flight fail with their timeout, or wait forever if
    /// they have none.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error.
    pub async fn close(&self) -> Result<()> {
        // ---
        {
            let mut tasks = match self.inner.tasks.lock() {
                Ok(tasks) => tasks,
                Err(poisoned) => poisoned.into_inner(),
            };
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.inner.readiness.set(EngineState::Disconnected);
        self.inner.transport.close().await
    }
}

// src/server/mod.rs
//! Callee engine.
//!
//! [`RpcCallee`] consumes request envelopes from the request topic, runs the
//! handler registered for each `method`, and publishes the envelope carrying
//! the handler's result to the reply topic.
//!
//! Every request is handled on its own task, so a slow handler never holds
//! up unrelated requests. A handler that fails or panics produces an error
//! payload reply (`{"error": {"message": ...}}`); the receive loop keeps
//! running either way.

mod handler;

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use handler::{DispatchTable, Handler, HandlerFuture};

use crate::lifecycle::{await_link, spawn_link_monitor, Readiness};
use crate::transport::runner::{self, TransportConsumer};
use crate::{
    // ---
    decode,
    encode,
    log_debug,
    log_info,
    log_warn,
    Address,
    ConnectionState,
    Delivery,
    EngineState,
    Envelope,
    Result,
    RpcConfig,
    RpcError,
    Subscription,
    TransportPtr,
    UnknownMethodPolicy,
};

/// Running callee instance.
///
/// Cheap to clone (internally `Arc`-backed).
///
/// # Example
///
/// ```no_run
/// use pubsub_rpc::{RpcCallee, RpcConfig};
/// use serde_json::json;
///
/// # async fn example() -> pubsub_rpc::Result<()> {
/// let config = RpcConfig::new("localhost", 1883, "", "/local/request", "/local/reply");
/// let callee = RpcCallee::connect(config).await?;
///
/// callee.register_call("echo", |env| async move { Ok(env.data) });
/// callee.register_call("version", |_env| async { Ok(json!("1.0")) });
///
/// callee.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcCallee {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    dispatch: DispatchTable,
    readiness: Arc<Readiness>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn abort_tasks(&self) {
        // ---
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

struct RequestConsumer {
    topic: Subscription,
    reply_topic: Address,
    transport: TransportPtr,
    dispatch: DispatchTable,
    unknown_method: UnknownMethodPolicy,
}

#[async_trait::async_trait]
impl TransportConsumer for RequestConsumer {
    fn subscription(&self) -> Subscription {
        self.topic.clone()
    }

    async fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        // ---
        let request = decode(&delivery.payload)?;

        let Some(handler) = self.dispatch.get(&request.method) else {
            return self.reply_unknown(request, delivery).await;
        };

        let transport = self.transport.clone();
        let reply_topic = self.reply_topic.clone();

        tokio::spawn(async move {
            // ---
            let reply = invoke(handler, request).await;
            let payload = match encode(&reply) {
                Ok(payload) => payload,
                Err(_err) => {
                    log_warn!("reply for {} ({}) not encodable: {_err}", reply.method, reply.tid);
                    return;
                }
            };
            if let Err(_err) = transport.publish(&reply_topic, payload).await {
                log_warn!("reply for {} ({}) not published: {_err}", reply.method, reply.tid);
            }
        });

        Ok(())
    }
}

impl RequestConsumer {
    async fn reply_unknown(&self, request: Envelope, delivery: Delivery) -> Result<()> {
        // ---
        match self.unknown_method {
            UnknownMethodPolicy::Echo => {
                log_debug!("no handler for {}, echoing request", request.method);
                self.transport
                    .publish(&self.reply_topic, delivery.payload)
                    .await
            }
            UnknownMethodPolicy::Reject => {
                log_debug!("no handler for {}, rejecting request", request.method);
                let message = format!("unknown method: {}", request.method);
                let payload = encode(&request.into_error_reply(message))?;
                self.transport.publish(&self.reply_topic, payload).await
            }
        }
    }
}

/// Run `handler` on a copy of `request` and fold its outcome into the reply.
///
/// The handler runs in its own task so that a panic is contained there.
async fn invoke(handler: Handler, request: Envelope) -> Envelope {
    // ---
    let copy = request.clone();
    let outcome = tokio::spawn(async move { handler(copy).await }).await;

    match outcome {
        Ok(Ok(data)) => Envelope { data, ..request },
        Ok(Err(RpcError::Handler(message))) => request.into_error_reply(message),
        Ok(Err(err)) => request.into_error_reply(err.to_string()),
        Err(join_err) => {
            log_warn!("handler for {} ({}) panicked", request.method, request.tid);
            let message = if join_err.is_panic() {
                "handler panicked".to_string()
            } else {
                "handler cancelled".to_string()
            };
            request.into_error_reply(message)
        }
    }
}

impl RpcCallee {
    // ---
    /// Create a callee over an explicitly provided transport.
    ///
    /// Returns once the request subscription is live. Handlers may be
    /// registered before or after this point.
    ///
    /// # Errors
    ///
    /// - [`RpcError::MissingConfig`] if the config is incomplete
    /// - [`RpcError::Connection`] if the link is not up within
    ///   `config.connect_timeout`
    /// - the transport's error if the request subscription fails
    pub async fn with_transport(transport: TransportPtr, config: RpcConfig) -> Result<Self> {
        // ---
        config.validate()?;

        let readiness = Arc::new(Readiness::new());
        readiness.set(EngineState::Connecting);
        await_link(&transport, config.connect_timeout).await?;

        readiness.set(EngineState::Subscribing);
        let dispatch = DispatchTable::new();
        let consumer = RequestConsumer {
            topic: Subscription::from(config.request_topic.as_str()),
            reply_topic: Address::from(config.reply_topic.as_str()),
            transport: transport.clone(),
            dispatch: dispatch.clone(),
            unknown_method: config.unknown_method,
        };
        let rx_task = runner::run(transport.clone(), consumer).await?;

        readiness.set(EngineState::Ready);
        let monitor = spawn_link_monitor(&transport, readiness.clone());

        log_info!(
            "{}: callee ready (request: {}, reply: {})",
            transport.transport_id(),
            config.request_topic,
            config.reply_topic
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                dispatch,
                readiness,
                shutdown,
                tasks: Mutex::new(vec![rx_task, monitor]),
            }),
        })
    }

    /// Create a callee over the transport selected by `config`.
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

    /// Register (or replace) the handler for `method`.
    ///
    /// The handler receives a copy of the request envelope; its `Ok` value
    /// becomes the reply `data`, its `Err` an error payload.
    pub fn register_call<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        // ---
        let method = method.into();
        if self.inner.dispatch.register(method.clone(), handler) {
            log_debug!("handler for {method} replaced");
        }
    }

    /// Register (or replace) a typed handler; see
    /// [`DispatchTable::register_typed`].
    pub fn register_typed<F, Fut, Req, Resp>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Resp>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        // ---
        self.inner.dispatch.register_typed(method, handler);
    }

    /// Remove the handler for `method`; returns whether one was present.
    pub fn unregister_call(&self, method: &str) -> bool {
        self.inner.dispatch.unregister(method)
    }

    /// Whether a handler is registered for `method`.
    pub fn has_handler(&self, method: &str) -> bool {
        self.inner.dispatch.contains(method)
    }

    /// Subscribe to engine state changes.
    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.inner.readiness.watch()
    }

    /// Whether the engine is currently [`EngineState::Ready`].
    pub fn is_ready(&self) -> bool {
        self.inner.readiness.get() == EngineState::Ready
    }

    /// Serve requests until [`shutdown`](Self::shutdown) is called or the
    /// transport is closed.
    ///
    /// Requests are processed in the background from construction on; this
    /// only parks the calling task.
    pub async fn run(&self) -> Result<()> {
        // ---
        let mut stop = self.inner.shutdown.subscribe();
        let mut link = self.inner.transport.connection();

        let stopped = async {
            let _ = stop.wait_for(|stopped| *stopped).await;
        };
        let closed = async {
            let _ = link.wait_for(|state| *state == ConnectionState::Closed).await;
        };

        tokio::select! {
            () = stopped => {
                log_debug!("callee stopped by shutdown");
            }
            () = closed => {
                log_debug!("callee stopped, transport closed");
            }
        }
        Ok(())
    }

    /// Stop serving and close the transport.
    ///
    /// Requests whose handlers are already running may still publish their
    /// replies before the transport closes.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error.
    pub async fn shutdown(&self) -> Result<()> {
        // ---
        log_info!(
            "{}: callee shutting down (methods: {:?})",
            self.inner.transport.transport_id(),
            self.inner.dispatch.methods()
        );
        self.inner.abort_tasks();
        self.inner.readiness.set(EngineState::Disconnected);
        self.inner.shutdown.send_replace(true);
        self.inner.transport.close().await
    }
}

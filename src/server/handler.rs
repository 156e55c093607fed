use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{Envelope, Result, RpcError};

/// Future returned by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Type-erased async handler.
///
/// Receives a copy of the request envelope and returns the reply `data`.
/// Wrapped in `Arc` for cheap cloning into per-request tasks.
pub type Handler = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// Method name to handler mapping, owned by one callee.
///
/// Reads are taken on every request; writes are meant for setup time but are
/// synchronized, so registering while requests are in flight is safe. A
/// request already dispatched keeps the handler it looked up.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handler for `method`.
    ///
    /// Returns `true` if an existing handler was replaced.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        // ---
        let boxed: Handler = Arc::new(move |env| Box::pin(handler(env)) as HandlerFuture);
        self.write().insert(method.into(), boxed).is_some()
    }

    /// Insert or replace a typed handler: `data` is decoded as `Req` and the
    /// returned `Resp` becomes the reply `data`.
    pub fn register_typed<F, Fut, Req, Resp>(&self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        // ---
        let handler = Arc::new(handler);
        self.register(method, move |env: Envelope| {
            let handler = handler.clone();
            async move {
                // ---
                let req: Req = serde_json::from_value(env.data)?;
                let resp = handler(req).await?;
                Ok::<Value, RpcError>(serde_json::to_value(resp)?)
            }
        })
    }

    /// Remove the handler for `method`; returns whether one was present.
    pub fn unregister(&self, method: &str) -> bool {
        self.write().remove(method).is_some()
    }

    /// Look up the handler for `method`.
    pub fn get(&self, method: &str) -> Option<Handler> {
        self.read().get(method).cloned()
    }

    /// Whether a handler is registered for `method`.
    pub fn contains(&self, method: &str) -> bool {
        self.read().contains_key(method)
    }

    /// Registered method names, unordered.
    pub fn methods(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    // Poison only means a registration panicked mid-call; the map itself is
    // intact.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Handler>> {
        match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Handler>> {
        match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

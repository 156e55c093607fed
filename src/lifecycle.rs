//! Engine readiness state machine.
//!
//! Both engines move through the same states while they come up:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribing -> Ready
//!                   ^                            |
//!                   +------ link lost/restored --+
//! ```
//!
//! Construction drives the first pass and returns only once `Ready`. After
//! that, a monitor task mirrors the transport's link signal: a lost link
//! shows as `Disconnected`, and `Ready` returns when the transport reports
//! the link (and its resubscriptions) back.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_info,
    ConnectionState,
    Result,
    RpcError,
    TransportPtr,
};

/// Readiness of a caller or callee engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No usable link. Publishes are still accepted; replies are not observed.
    Disconnected,
    /// Waiting for the transport link.
    Connecting,
    /// Link up; establishing the engine's subscription.
    Subscribing,
    /// Subscribed and processing messages.
    Ready,
}

/// Owner side of an engine's readiness signal.
pub(crate) struct Readiness {
    tx: watch::Sender<EngineState>,
}

impl Readiness {
    pub(crate) fn new() -> Self {
        // ---
        let (tx, _) = watch::channel(EngineState::Disconnected);
        Self { tx }
    }

    pub(crate) fn set(&self, next: EngineState) {
        // ---
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            log_debug!("engine state {current:?} -> {next:?}");
            *current = next;
            true
        });
    }

    pub(crate) fn get(&self) -> EngineState {
        *self.tx.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<EngineState> {
        self.tx.subscribe()
    }
}

/// Wait until the transport link is up, within `timeout`.
///
/// # Errors
///
/// Returns [`RpcError::Connection`] if the link is closed or does not come
/// up in time.
pub(crate) async fn await_link(transport: &TransportPtr, timeout: Duration) -> Result<()> {
    // ---
    let mut link = transport.connection();

    let wait = link.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed));

    let state = match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(state)) => *state,
        Ok(Err(_)) => ConnectionState::Closed,
        Err(_) => {
            return Err(RpcError::Connection(format!(
                "{}: link not up within {timeout:?}",
                transport.transport_id()
            )))
        }
    };

    if state == ConnectionState::Closed {
        return Err(RpcError::Connection(format!(
            "{}: transport is closed",
            transport.transport_id()
        )));
    }

    Ok(())
}

/// Mirror the transport link into the engine state until the transport closes.
pub(crate) fn spawn_link_monitor(
    transport: &TransportPtr,
    readiness: std::sync::Arc<Readiness>,
) -> JoinHandle<()> {
    // ---
    let mut link = transport.connection();
    let _transport_id = transport.transport_id().to_string();

    tokio::spawn(async move {
        // ---
        loop {
            let state = *link.borrow_and_update();
            match state {
                ConnectionState::Connected => readiness.set(EngineState::Ready),
                ConnectionState::Connecting => readiness.set(EngineState::Connecting),
                ConnectionState::Disconnected => {
                    log_info!("{_transport_id}: link lost, engine not ready");
                    readiness.set(EngineState::Disconnected);
                }
                ConnectionState::Closed => {
                    readiness.set(EngineState::Disconnected);
                    break;
                }
            }
            if link.changed().await.is_err() {
                readiness.set(EngineState::Disconnected);
                break;
            }
        }
    })
}

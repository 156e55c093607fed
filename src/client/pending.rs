//! Pending-call table.
//!
//! Maps `(method, tid)` to a single-slot rendezvous between the reply loop
//! and the task awaiting that reply. A slot is either Pending (sender held),
//! Fulfilled (sender consumed by the first reply) or gone. Every exit path of
//! a waiter (reply taken, timeout, cancel, dropped future) removes its slot,
//! so the table only holds calls somebody is still waiting on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Number;
use tokio::sync::oneshot;

use crate::{
    // ---
    log_debug,
    Envelope,
    Result,
    RpcError,
    TransactionId,
};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The table is never left half-updated by a panicking holder: every
/// critical section is a single insert, lookup or removal. The worst outcome
/// of continuing after a poison is a dropped reply.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Slot {
    /// Registration sequence; guards against removing a newer slot that
    /// reused the same key.
    seq: u64,
    /// `None` once fulfilled.
    tx: Option<oneshot::Sender<Envelope>>,
}

#[derive(Default)]
struct Table {
    next_seq: u64,
    calls: HashMap<String, HashMap<TransactionId, Slot>>,
}

impl Table {
    fn remove(&mut self, method: &str, tid: &TransactionId, seq: Option<u64>) -> bool {
        // ---
        let Some(by_tid) = self.calls.get_mut(method) else {
            return false;
        };

        let matches = match (by_tid.get(tid), seq) {
            (Some(slot), Some(seq)) => slot.seq == seq,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            by_tid.remove(tid);
            if by_tid.is_empty() {
                self.calls.remove(method);
            }
        }
        matches
    }
}

/// Concurrent registry of in-flight calls, owned by one caller.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct PendingCalls {
    table: Arc<Mutex<Table>>,
}

/// The awaiting side of one registered call.
///
/// Obtained from [`PendingCalls::register`] and consumed by
/// [`PendingCalls::take`]. Dropping it releases the slot.
pub struct Waiter {
    method: String,
    tid: TransactionId,
    seq: u64,
    timestamp: Option<Number>,
    rx: oneshot::Receiver<Envelope>,
    table: Arc<Mutex<Table>>,
}

impl Waiter {
    /// Attach the request timestamp reported by a timeout error.
    pub fn with_timestamp(mut self, timestamp: Option<Number>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Method of the registered call.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Transaction id of the registered call.
    pub fn tid(&self) -> &TransactionId {
        &self.tid
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // ---
        let mut table = lock_ignore_poison(&self.table);
        table.remove(&self.method, &self.tid, Some(self.seq));
    }
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a Pending slot for `(method, tid)`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateTransaction`] if the key is already in
    /// flight. The existing slot is left untouched.
    pub fn register(&self, method: &str, tid: &TransactionId) -> Result<Waiter> {
        // ---
        let (tx, rx) = oneshot::channel();
        let mut table = lock_ignore_poison(&self.table);

        if table
            .calls
            .get(method)
            .is_some_and(|by_tid| by_tid.contains_key(tid))
        {
            return Err(RpcError::DuplicateTransaction {
                method: method.to_string(),
                tid: tid.clone(),
            });
        }

        table.next_seq += 1;
        let seq = table.next_seq;
        table
            .calls
            .entry(method.to_string())
            .or_default()
            .insert(tid.clone(), Slot { seq, tx: Some(tx) });

        Ok(Waiter {
            method: method.to_string(),
            tid: tid.clone(),
            seq,
            timestamp: None,
            rx,
            table: self.table.clone(),
        })
    }

    /// Deliver a reply to the Pending slot for `(method, tid)`.
    ///
    /// Returns `false` when there is no such slot, when it was already
    /// fulfilled, or when its waiter is gone. A rejected reply never replaces
    /// the one already delivered.
    pub fn fulfill(&self, method: &str, tid: &TransactionId, envelope: Envelope) -> bool {
        // ---
        let mut table = lock_ignore_poison(&self.table);

        let Some(slot) = table
            .calls
            .get_mut(method)
            .and_then(|by_tid| by_tid.get_mut(tid))
        else {
            return false;
        };

        let Some(tx) = slot.tx.take() else {
            log_debug!("duplicate reply dropped (method: {method}, tid: {tid})");
            return false;
        };

        tx.send(envelope).is_ok()
    }

    /// Wait for the reply to `waiter`, up to `timeout` (`None` waits forever).
    ///
    /// The slot is removed on every outcome.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if no reply arrives in time
    /// - [`RpcError::Cancelled`] if the slot is cancelled while waiting
    pub async fn take(&self, mut waiter: Waiter, timeout: Option<Duration>) -> Result<Envelope> {
        // ---
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut waiter.rx).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(RpcError::Timeout {
                        method: waiter.method.clone(),
                        tid: waiter.tid.clone(),
                        timestamp: waiter.timestamp.clone(),
                        waited: limit,
                    })
                }
            },
            None => (&mut waiter.rx).await,
        };

        outcome.map_err(|_| RpcError::Cancelled {
            method: waiter.method.clone(),
            tid: waiter.tid.clone(),
        })
    }

    /// Remove the slot for `(method, tid)` without waiting.
    ///
    /// A task blocked in [`take`](Self::take) on it fails with
    /// [`RpcError::Cancelled`]. Returns `false` if there was no slot.
    pub fn cancel(&self, method: &str, tid: &TransactionId) -> bool {
        // ---
        let mut table = lock_ignore_poison(&self.table);
        table.remove(method, tid, None)
    }

    /// Whether `(method, tid)` is currently registered.
    pub fn contains(&self, method: &str, tid: &TransactionId) -> bool {
        // ---
        let table = lock_ignore_poison(&self.table);
        table
            .calls
            .get(method)
            .is_some_and(|by_tid| by_tid.contains_key(tid))
    }

    /// Number of registered calls.
    pub fn len(&self) -> usize {
        // ---
        let table = lock_ignore_poison(&self.table);
        table.calls.values().map(HashMap::len).sum()
    }

    /// Whether no call is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

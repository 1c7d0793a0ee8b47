//! Request correlation
//!
//! Every outbound request becomes a pending operation keyed by its
//! [`MessageId`] until exactly one of three things happens:
//!
//! 1. **Response**: a frame with the same id settles it (result or server error)
//! 2. **Deadline**: its timer fires and it is rejected with `RequestTimeout`
//! 3. **Disconnect**: `reject_all` drains the table
//!
//! Whichever comes first removes the entry; the others then find nothing and
//! are ignored. An entry is therefore completed at most once, and a late
//! response for an expired request is logged and dropped.
//!
//! # Why Oneshot Channels?
//!
//! The caller holds the receiving half, the table holds the sending half.
//! Completion is a single `send`, and dropping a table entry without
//! sending is impossible through this module's API.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tether_core::{Error, ErrorObject, MessageId, Result};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Receiving half handed to the caller of `register`
pub type Completion = oneshot::Receiver<Result<Value>>;

/// A request waiting for its response
pub struct PendingOperation {
    /// Method name, kept for diagnostics and error messages
    method: String,
    /// The deadline this operation was registered with
    timeout: Duration,
    /// When the deadline elapses
    deadline: Instant,
    tx: oneshot::Sender<Result<Value>>,
    timer: Option<JoinHandle<()>>,
}

impl PendingOperation {
    /// Method name of the request
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Instant at which the request expires
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    fn complete(self, outcome: Result<Value>) {
        // The caller may have stopped waiting; that is not an error here.
        let _ = self.tx.send(outcome);
    }
}

/// Table of in-flight requests
#[derive(Clone, Default)]
pub struct MessageCorrelator {
    pending: Arc<Mutex<HashMap<MessageId, PendingOperation>>>,
}

impl MessageCorrelator {
    /// Create an empty correlator
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request and start its deadline timer
    ///
    /// A timeout too large to represent never fires.
    ///
    /// Fails if `id` is already pending.
    pub async fn register(
        &self,
        id: MessageId,
        method: impl Into<String>,
        timeout: Duration,
    ) -> Result<Completion> {
        let method = method.into();
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.lock().await;
        if pending.contains_key(&id) {
            return Err(Error::protocol(format!(
                "request id {} is already pending",
                id
            )));
        }

        // Spawned under the lock: the timer cannot observe the table before
        // the entry is in it.
        let timer = {
            let correlator = self.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                correlator.expire(&id).await;
            })
        };

        pending.insert(
            id,
            PendingOperation {
                method,
                timeout,
                deadline: deadline_after(timeout),
                tx,
                timer: Some(timer),
            },
        );

        Ok(rx)
    }

    /// Complete a request successfully
    pub async fn resolve(&self, id: &MessageId, result: Value) -> bool {
        match self.take(id, true).await {
            Some(op) => {
                tracing::trace!(id = %id, method = %op.method, "Request resolved");
                op.complete(Ok(result));
                true
            }
            None => {
                tracing::warn!(id = %id, "Discarding response for unknown or expired request");
                false
            }
        }
    }

    /// Fail a request with the given error
    pub async fn reject(&self, id: &MessageId, error: Error) -> bool {
        match self.take(id, true).await {
            Some(op) => {
                tracing::debug!(id = %id, method = %op.method, error = %error, "Request rejected");
                op.complete(Err(error));
                true
            }
            None => {
                tracing::warn!(id = %id, error = %error, "Discarding rejection for unknown or expired request");
                false
            }
        }
    }

    /// Complete a request from a response payload
    ///
    /// An error payload becomes `ServerError` carrying the request's method.
    pub async fn settle(
        &self,
        id: &MessageId,
        outcome: std::result::Result<Value, ErrorObject>,
    ) -> bool {
        let Some(op) = self.take(id, true).await else {
            tracing::warn!(id = %id, "Discarding response for unknown or expired request");
            return false;
        };

        match outcome {
            Ok(result) => op.complete(Ok(result)),
            Err(error) => {
                tracing::debug!(id = %id, method = %op.method, code = error.code, "Server returned an error");
                let method = op.method.clone();
                op.complete(Err(Error::ServerError { method, error }));
            }
        }
        true
    }

    /// Reject a request whose deadline elapsed
    pub async fn expire(&self, id: &MessageId) -> bool {
        // Called from the timer task itself, so the timer is dropped, not aborted.
        let Some(op) = self.take(id, false).await else {
            return false;
        };

        tracing::warn!(
            id = %id,
            method = %op.method,
            timeout_ms = u64::try_from(op.timeout.as_millis()).unwrap_or(u64::MAX),
            "Request timed out"
        );
        let error = Error::RequestTimeout {
            method: op.method.clone(),
            timeout: op.timeout,
        };
        op.complete(Err(error));
        true
    }

    /// Drain the table, rejecting every entry
    ///
    /// `make_error` receives each request's method name.
    pub async fn reject_all(&self, make_error: impl Fn(&str) -> Error) -> usize {
        let drained: Vec<(MessageId, PendingOperation)> =
            self.pending.lock().await.drain().collect();
        let count = drained.len();

        for (_, mut op) in drained {
            if let Some(timer) = op.timer.take() {
                timer.abort();
            }
            let error = make_error(&op.method);
            op.complete(Err(error));
        }

        if count > 0 {
            tracing::debug!(count, "Rejected all pending requests");
        }
        count
    }

    /// Synchronous `reject_all` for teardown paths that cannot await
    ///
    /// Does nothing if the table is locked at that moment; the holder is then
    /// still alive and will complete its entries itself.
    pub fn cancel_all_now(&self, make_error: impl Fn(&str) -> Error) -> usize {
        let Ok(mut pending) = self.pending.try_lock() else {
            return 0;
        };
        let drained: Vec<PendingOperation> = pending.drain().map(|(_, op)| op).collect();
        drop(pending);

        let count = drained.len();
        for mut op in drained {
            if let Some(timer) = op.timer.take() {
                timer.abort();
            }
            let error = make_error(&op.method);
            op.complete(Err(error));
        }
        count
    }

    /// Number of requests in flight
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether `id` is still in flight
    pub async fn contains(&self, id: &MessageId) -> bool {
        self.pending.lock().await.contains_key(id)
    }

    async fn take(&self, id: &MessageId, cancel_timer: bool) -> Option<PendingOperation> {
        let mut op = self.pending.lock().await.remove(id)?;
        if let Some(timer) = op.timer.take() {
            if cancel_timer {
                timer.abort();
            }
        }
        Some(op)
    }
}

/// Allocates correlation ids unique for the lifetime of one client
///
/// Ids combine the client's creation time with a counter, so two clients in
/// the same process do not hand out the same ids either.
#[derive(Debug)]
pub struct IdGenerator {
    epoch_ms: u128,
    counter: AtomicU64,
}

impl IdGenerator {
    /// Start a new id sequence
    pub fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self {
            epoch_ms,
            counter: AtomicU64::new(0),
        }
    }

    /// Next id in the sequence
    pub fn next_id(&self) -> MessageId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        MessageId::new(format!("{}-{}", self.epoch_ms, n))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Roughly 30 years; stands in for deadlines past what `Instant` can hold
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + timeout`, saturating to a far-future instant instead of overflowing
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

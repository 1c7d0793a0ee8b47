//! Connection state
//!
//! # Connection States
//!
//! - **Disconnected**: initial state, and after `disconnect()` or a clean close
//! - **Connecting**: an explicit `connect()` is opening the transport
//! - **Connected**: open and operational
//! - **Reconnecting**: the link closed abnormally, attempts are scheduled
//! - **Error**: the open failed, or reconnection gave up
//!
//! # State Transitions
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open ok──▶ Connected
//!                                  │                    │   ▲
//!                        open fail │     abnormal close │   │ reconnect ok
//!                                  ▼                    ▼   │
//!                                Error ◀──exhausted── Reconnecting
//!
//! any state ──disconnect()──▶ Disconnected
//! ```
//!
//! `Error` and `Disconnected` stay put until the next explicit `connect()`.
//!
//! The current value lives in a `watch` channel so readers always see a
//! consistent snapshot. Observers registered on the [`StateCell`] run in
//! registration order for every transition that changes the value; setting
//! the value it already holds notifies nobody.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Open and operational
    Connected,
    /// Waiting to retry after an abnormal closure
    Reconnecting,
    /// Open failed or reconnection gave up
    Error,
}

impl ConnectionState {
    /// Value reported on the connection state gauge
    pub fn as_metric(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Error => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Read-only snapshot of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Current state
    pub state: ConnectionState,
    /// Reconnection attempts since the last successful connection
    pub reconnect_attempts: u32,
    /// Requests awaiting a response
    pub pending_requests: usize,
    /// Same as `Client::is_connected`
    pub connected: bool,
}

/// Handle returned by observer registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: u64,
    list: Vec<(ObserverId, StateObserver)>,
}

/// Holds the current state and notifies observers on change
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
    observers: Mutex<Observers>,
}

impl StateCell {
    /// Start in `Disconnected`
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            tx,
            observers: Mutex::new(Observers::default()),
        }
    }

    /// Current state
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Receiver that wakes on every change
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next`; returns false (and notifies nobody) if already there
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut previous = next;
        let changed = self.tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                previous = *state;
                *state = next;
                true
            }
        });

        if !changed {
            return false;
        }

        tracing::info!(from = %previous, to = %next, "Connection state changed");

        // Snapshot so observers may register or query state themselves.
        let observers: Vec<StateObserver> = self
            .lock_observers()
            .list
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(next);
        }
        true
    }

    /// Register an observer; it is not called for the current value
    pub fn observe(&self, observer: impl Fn(ConnectionState) + Send + Sync + 'static) -> ObserverId {
        let mut observers = self.lock_observers();
        observers.next_id += 1;
        let id = ObserverId(observers.next_id);
        observers.list.push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.list.len();
        observers.list.retain(|(existing, _)| *existing != id);
        observers.list.len() != before
    }

    fn lock_observers(&self) -> MutexGuard<'_, Observers> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

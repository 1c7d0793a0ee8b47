//! Periodic liveness probes
//!
//! While connected, the client runs one [`HeartbeatMonitor`] task that calls a
//! probe every interval. The probe is an ordinary correlated request, so it is
//! bound by the same request timeout as application traffic and never blocks
//! it.
//!
//! # Failure policy
//!
//! By default a failed probe is only logged: the transport closing abnormally
//! is what drives reconnection. With a failure threshold configured, that many
//! consecutive failures invoke the `on_unresponsive` callback once and stop
//! the monitor.

use crate::correlator::deadline_after;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tether_core::Result;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs a probe at a fixed interval until stopped
pub struct HeartbeatMonitor {
    interval: Duration,
    max_failures: Option<u32>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor
    pub fn new(interval: Duration, max_failures: Option<u32>) -> Self {
        Self {
            interval,
            max_failures,
            task: Mutex::new(None),
        }
    }

    /// Probe interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start probing; a running monitor is restarted
    ///
    /// The first probe goes out one interval after start. A zero interval
    /// disables heartbeats and leaves the monitor stopped.
    pub fn start<P, Fut, U>(&self, probe: P, on_unresponsive: U)
    where
        P: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
        U: FnOnce(u32) + Send + 'static,
    {
        let period = self.interval;
        let max_failures = self.max_failures;

        if period.is_zero() {
            self.stop();
            tracing::debug!("Heartbeat disabled");
            return;
        }

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(deadline_after(period), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures = 0u32;

            loop {
                ticker.tick().await;
                match probe().await {
                    Ok(_) => {
                        if failures > 0 {
                            tracing::info!(previous_failures = failures, "Heartbeat recovered");
                        }
                        failures = 0;
                        tracing::trace!("Heartbeat acknowledged");
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(error = %e, consecutive_failures = failures, "Heartbeat failed");
                        if max_failures.is_some_and(|max| failures >= max) {
                            on_unresponsive(failures);
                            return;
                        }
                    }
                }
            }
        });

        let previous = self.lock_task().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancel the probe loop; no-op when not running
    pub fn stop(&self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
            tracing::debug!("Heartbeat stopped");
        }
    }

    /// Whether a probe loop is active
    pub fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        // The slot holds no invariant a panicking holder could break.
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

//! The connection manager
//!
//! [`Client`] is the single entry point: it owns the connection state
//! machine and wires the transport to the correlator, heartbeat and
//! reconnection scheduler.
//!
//! # Client Lifecycle
//!
//! 1. **Connect**: `connect()` opens the transport within the open timeout
//! 2. **Use**: `send()` / `request()` correlate responses by id; notifications
//!    go to handlers and the event stream
//! 3. **Recover**: an abnormal close fails in-flight requests and schedules
//!    reconnection with exponential backoff
//! 4. **Close**: `disconnect()` closes with code 1000 and rejects whatever is
//!    still pending
//!
//! # Cloning
//!
//! `Client` is a cheap `Arc` handle; clones share one connection. Construct
//! one client per logical connection and pass it to whoever needs it.
//!
//! # Concurrency
//!
//! State transitions (connect, disconnect, closure handling, reconnection
//! attempts) are serialized by one lifecycle lock, and the pending-request
//! table sits behind its own lock. Readers such as `state()` and
//! `is_connected()` only ever see snapshots. Background tasks hold weak
//! references, so dropping the last handle tears the connection down.

use crate::config::ClientConfig;
use crate::connection_state::{ConnectionState, ConnectionStats, ObserverId, StateCell};
use crate::correlator::{IdGenerator, MessageCorrelator};
use crate::heartbeat::HeartbeatMonitor;
use crate::metrics::ClientMetrics;
use crate::notification::NotificationHandler;
use crate::reconnect::{ExponentialBackoff, ReconnectionScheduler, ReconnectionStrategy};
use crate::transport::{
    is_abnormal, Link, Outbound, Transport, TransportEvent, WebSocketTransport,
    ABNORMAL_CLOSURE, HEARTBEAT_TIMEOUT_CLOSURE, NORMAL_CLOSURE,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tether_core::{codec, methods, Error, Message, MessageKind, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 256;

/// Typed events published by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connection state changed
    StateChanged(ConnectionState),
    /// The server pushed a notification
    Notification(Message),
    /// A reconnection attempt was scheduled
    ReconnectScheduled {
        /// 1-indexed attempt number
        attempt: u32,
        /// Wait before the attempt
        delay: Duration,
    },
    /// A failure not tied to any single request
    Error(Error),
}

/// Persistent request/response client
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct ActiveLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

struct Inner {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    state: StateCell,
    correlator: MessageCorrelator,
    heartbeat: HeartbeatMonitor,
    scheduler: Mutex<ReconnectionScheduler>,
    link: Mutex<Option<ActiveLink>>,
    generation: AtomicU64,
    lifecycle: tokio::sync::Mutex<()>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    ids: IdGenerator,
    notifications: NotificationHandler,
    events: broadcast::Sender<ClientEvent>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Client {
    /// Client over WebSocket with backoff derived from `config`; not yet connected
    pub fn new(config: ClientConfig) -> Self {
        let strategy = default_strategy(&config);
        Self::from_parts(config, Box::new(WebSocketTransport), strategy, None)
    }

    /// Start configuring a client for `endpoint`
    pub fn builder(endpoint: impl Into<String>) -> crate::ClientBuilder {
        crate::ClientBuilder::new(endpoint)
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        transport: Box<dyn Transport>,
        strategy: Box<dyn ReconnectionStrategy>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = StateCell::new();

        {
            let events = events.clone();
            let metrics = metrics.clone();
            state.observe(move |next| {
                if let Some(ref m) = metrics {
                    m.update_connection_state(next);
                }
                let _ = events.send(ClientEvent::StateChanged(next));
            });
        }

        let heartbeat =
            HeartbeatMonitor::new(config.heartbeat_interval, config.heartbeat_max_failures);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state,
                correlator: MessageCorrelator::new(),
                heartbeat,
                scheduler: Mutex::new(ReconnectionScheduler::new(strategy)),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                lifecycle: tokio::sync::Mutex::new(()),
                reconnect_task: Mutex::new(None),
                ids: IdGenerator::new(),
                notifications: NotificationHandler::new(),
                events,
                metrics,
            }),
        }
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open the connection
    ///
    /// Fails with `ConnectionTimeout` if the handshake exceeds the connect
    /// timeout, or `TransportUnavailable` if the endpoint cannot be reached
    /// over this transport; either way the state becomes `Error`. Calling it
    /// while connected is a no-op.
    #[tracing::instrument(skip(self), fields(endpoint = %self.inner.config.endpoint))]
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Close the connection and reject every pending request with `ClientClosed`
    ///
    /// Idempotent: calling it while disconnected does nothing.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    /// Send a request and wait for its result
    ///
    /// `params` serializing to `null` are omitted from the frame.
    #[tracing::instrument(skip(self, params))]
    pub async fn send<P: Serialize>(&self, method: &str, params: P) -> Result<Value> {
        self.send_with_timeout(method, params, self.inner.config.request_timeout)
            .await
    }

    /// Like [`send`](Self::send) with a per-call deadline
    pub async fn send_with_timeout<P: Serialize>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<Value> {
        let params = to_params(method, params)?;
        self.inner.send_request(method, params, timeout).await
    }

    /// Send a request and deserialize its result
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let value = self.send(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::protocol(format!("unexpected result for `{}`: {}", method, e)))
    }

    /// Send a notification; nothing is awaited
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let params = to_params(method, params)?;
        let outbound = self
            .inner
            .connected_link()
            .map(|(_, outbound)| outbound)
            .ok_or_else(|| Error::NotConnected {
                method: method.to_string(),
            })?;

        let frame = codec::encode(&Message::notification(method, params))?;
        outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::client_closed(method, "transport closed before send"))
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Connected, and the transport still reports the link open
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Snapshot of state, attempts and pending requests
    pub async fn stats(&self) -> ConnectionStats {
        let reconnect_attempts = self.inner.lock_scheduler().attempts();
        let pending_requests = self.inner.correlator.pending_count().await;
        ConnectionStats {
            state: self.state(),
            reconnect_attempts,
            pending_requests,
            connected: self.is_connected(),
        }
    }

    /// Call `observer` on every state change, in registration order
    pub fn on_state_change(
        &self,
        observer: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.state.observe(observer)
    }

    /// Remove a state observer
    pub fn remove_state_observer(&self, id: ObserverId) -> bool {
        self.inner.state.unobserve(id)
    }

    /// Receiver that wakes on state changes
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.watch()
    }

    /// Subscribe to typed client events
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Register an async handler for notifications with this method
    ///
    /// Handlers run on their own task, so they may issue requests.
    pub async fn on_notification<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.notifications.register(method, handler).await;
    }

    /// The notification handler registry
    pub fn notification_handler(&self) -> &NotificationHandler {
        &self.inner.notifications
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

pub(crate) fn default_strategy(config: &ClientConfig) -> Box<dyn ReconnectionStrategy> {
    Box::new(
        ExponentialBackoff::new(config.reconnect_base_delay)
            .with_max_attempts(config.max_reconnect_attempts),
    )
}

fn to_params<P: Serialize>(method: &str, params: P) -> Result<Option<Value>> {
    let value = serde_json::to_value(params)
        .map_err(|e| Error::protocol(format!("cannot encode params for `{}`: {}", method, e)))?;
    Ok((!value.is_null()).then_some(value))
}

impl Inner {
    async fn connect(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.is_connected() {
            return Ok(());
        }

        self.cancel_reconnect();
        self.retire_stale_link().await;
        self.state.transition(ConnectionState::Connecting);
        tracing::info!("Connecting");

        match self.open_link().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "Connection failed");
                if let Some(ref m) = self.metrics {
                    m.record_error(e.kind());
                }
                self.state.transition(ConnectionState::Error);
                let _ = self.events.send(ClientEvent::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// Fail everything sent over a link that died before its closure was handled.
    /// Caller holds the lifecycle lock.
    async fn retire_stale_link(&self) {
        let stale = self.lock_link().take();
        let Some(stale) = stale else {
            return;
        };

        tracing::debug!(generation = stale.generation, "Retiring dead link");
        self.heartbeat.stop();
        let _ = stale.outbound.send(Outbound::Close {
            code: NORMAL_CLOSURE,
            reason: "replaced".to_string(),
        });

        self.correlator
            .reject_all(|method| Error::client_closed(method, "connection lost"))
            .await;
        self.record_pending().await;
    }

    async fn record_pending(&self) {
        if let Some(ref m) = self.metrics {
            m.update_pending(self.correlator.pending_count().await);
        }
    }

    /// Open the transport and go to `Connected`. Caller holds the lifecycle lock.
    async fn open_link(self: &Arc<Self>) -> Result<()> {
        let endpoint = &self.config.endpoint;
        let timeout = self.config.connect_timeout;

        let opening = self.transport.open(endpoint, self.config.token.as_deref());
        let Link { outbound, inbound } = match tokio::time::timeout(timeout, opening).await {
            Ok(link) => link?,
            Err(_) => {
                return Err(Error::ConnectionTimeout {
                    endpoint: endpoint.clone(),
                    timeout,
                })
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.lock_link() = Some(ActiveLink {
            generation,
            outbound,
        });
        self.lock_scheduler().reset();
        self.state.transition(ConnectionState::Connected);
        self.start_heartbeat(generation);

        tokio::spawn(read_loop(Arc::downgrade(self), generation, inbound));

        tracing::info!(generation, "Connected");
        Ok(())
    }

    async fn disconnect(self: &Arc<Self>) {
        let _lifecycle = self.lifecycle.lock().await;

        self.cancel_reconnect();
        self.heartbeat.stop();

        let link = self.lock_link().take();
        let had_link = link.is_some();
        if let Some(link) = link {
            let _ = link.outbound.send(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: "client disconnect".to_string(),
            });
        }

        let rejected = self
            .correlator
            .reject_all(|method| Error::client_closed(method, "client disconnected"))
            .await;
        self.record_pending().await;

        let changed = self.state.transition(ConnectionState::Disconnected);
        if had_link || changed || rejected > 0 {
            tracing::info!(rejected, "Disconnected");
        }
    }

    async fn send_request(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let started = Instant::now();
        let outcome = self.dispatch(method, params, timeout).await;

        if let Some(ref m) = self.metrics {
            let status = if outcome.is_ok() { "success" } else { "error" };
            m.record_request(method, status, started.elapsed().as_secs_f64());
            if let Err(ref e) = outcome {
                m.record_error(e.kind());
            }
        }

        outcome
    }

    async fn dispatch(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let Some((generation, outbound)) = self.connected_link() else {
            return Err(Error::NotConnected {
                method: method.to_string(),
            });
        };

        let id = self.ids.next_id();
        let frame = codec::encode(&Message::request(id.clone(), method, params))?;
        let completion = self.correlator.register(id.clone(), method, timeout).await?;
        self.record_pending().await;

        // A disconnect between the state check and `register` has already
        // drained the table; this entry must not outlive it.
        if self.current_generation() != Some(generation) {
            self.correlator
                .reject(&id, Error::client_closed(method, "connection closed before send"))
                .await;
        } else if outbound.send(Outbound::Frame(frame)).is_err() {
            self.correlator
                .reject(&id, Error::client_closed(method, "transport closed before send"))
                .await;
        } else {
            tracing::debug!(id = %id, "Request sent");
        }

        let outcome = completion
            .await
            .unwrap_or_else(|_| Err(Error::client_closed(method, "request abandoned")));
        self.record_pending().await;
        outcome
    }

    async fn handle_frame(self: &Arc<Self>, text: &str) {
        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, frame_len = text.len(), "Discarding malformed frame");
                if let Some(ref m) = self.metrics {
                    m.record_error(e.kind());
                }
                return;
            }
        };

        match message.kind {
            MessageKind::Response => {
                // `decode` guarantees responses carry an id.
                let Some(id) = message.id else { return };
                let outcome = match message.error {
                    Some(error) => Err(error),
                    None => Ok(message.result.unwrap_or(Value::Null)),
                };
                self.correlator.settle(&id, outcome).await;
            }
            MessageKind::Notification => self.handle_notification(message).await,
            MessageKind::Request => {
                tracing::warn!(method = %message.method_name(), "Discarding unexpected request from server");
            }
        }
    }

    async fn handle_notification(self: &Arc<Self>, message: Message) {
        let method = message.method_name().to_string();
        tracing::debug!(method = %method, "Notification received");
        if let Some(ref m) = self.metrics {
            m.record_notification(&method);
        }

        let _ = self.events.send(ClientEvent::Notification(message.clone()));

        let notifications = self.notifications.clone();
        tokio::spawn(async move {
            notifications.handle(message).await;
        });

        if method == methods::SERVER_SHUTDOWN {
            tracing::info!("Server announced shutdown");
            self.disconnect().await;
        }
    }

    /// React to the end of link `generation`
    async fn handle_closure(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut link = self.lock_link();
            match link.as_ref() {
                Some(active) if active.generation == generation => *link = None,
                _ => {
                    tracing::debug!(generation, code, "Ignoring closure of a retired link");
                    return;
                }
            }
        }

        self.heartbeat.stop();

        let abnormal = is_abnormal(code);
        if abnormal {
            tracing::warn!(code, reason = %reason, "Connection closed abnormally");
        } else {
            tracing::info!(code, reason = %reason, "Connection closed");
        }

        let cause = format!("connection closed with code {}", code);
        self.correlator
            .reject_all(|method| Error::client_closed(method, cause.clone()))
            .await;
        self.record_pending().await;

        if abnormal && self.config.auto_reconnect {
            self.schedule_next();
        } else {
            self.state.transition(ConnectionState::Disconnected);
        }
    }

    /// Schedule one reconnection attempt, or give up. Caller holds the lifecycle lock.
    fn schedule_next(self: &Arc<Self>) {
        let (next, attempts) = {
            let mut scheduler = self.lock_scheduler();
            (scheduler.schedule_next(), scheduler.attempts())
        };

        let Some(delay) = next else {
            tracing::error!(attempts, "Reconnection abandoned");
            self.state.transition(ConnectionState::Error);
            let _ = self
                .events
                .send(ClientEvent::Error(Error::ReconnectExhausted { attempts }));
            return;
        };

        tracing::info!(
            attempt = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnection"
        );
        if let Some(ref m) = self.metrics {
            m.record_reconnection_attempt();
        }
        self.state.transition(ConnectionState::Reconnecting);
        let _ = self.events.send(ClientEvent::ReconnectScheduled {
            attempt: attempts,
            delay,
        });

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.attempt_reconnect().await;
            }
        });

        // The previous handle may belong to the task running this call, so it
        // is detached rather than aborted.
        *self.lock_reconnect_task() = Some(task);
    }

    async fn attempt_reconnect(self: &Arc<Self>) {
        let _lifecycle = self.lifecycle.lock().await;

        if self.state.get() != ConnectionState::Reconnecting {
            return;
        }

        match self.open_link().await {
            Ok(()) => {
                tracing::info!("Reconnected");
                if let Some(ref m) = self.metrics {
                    m.record_reconnection_success();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reconnection attempt failed");
                if let Some(ref m) = self.metrics {
                    m.record_error(e.kind());
                }
                self.schedule_next();
            }
        }
    }

    fn start_heartbeat(self: &Arc<Self>, generation: u64) {
        let probe_target = Arc::downgrade(self);
        let close_target = Arc::downgrade(self);

        self.heartbeat.start(
            move || {
                let target = probe_target.clone();
                async move {
                    let Some(inner) = target.upgrade() else {
                        return Err(Error::client_closed(methods::SYSTEM_PING, "client dropped"));
                    };
                    let params = serde_json::json!({ "timestamp": chrono::Utc::now().timestamp_millis() });
                    let outcome = inner
                        .send_request(methods::SYSTEM_PING, Some(params), inner.config.request_timeout)
                        .await;
                    if outcome.is_err() {
                        if let Some(ref m) = inner.metrics {
                            m.record_heartbeat_failure();
                        }
                    }
                    outcome
                }
            },
            move |failures| {
                if let Some(inner) = close_target.upgrade() {
                    // Closure handling stops the heartbeat, so it must not run on
                    // the heartbeat's own task.
                    tokio::spawn(async move { inner.force_close(generation, failures).await });
                }
            },
        );
    }

    async fn force_close(self: &Arc<Self>, generation: u64, failures: u32) {
        tracing::warn!(failures, "Heartbeat unresponsive, forcing reconnection");

        if let Some((current, outbound)) = self.connected_link() {
            if current == generation {
                let _ = outbound.send(Outbound::Close {
                    code: HEARTBEAT_TIMEOUT_CLOSURE,
                    reason: "heartbeat timeout".to_string(),
                });
            }
        }

        self.handle_closure(generation, HEARTBEAT_TIMEOUT_CLOSURE, "heartbeat timeout".to_string())
            .await;
    }

    fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
            && self
                .lock_link()
                .as_ref()
                .is_some_and(|link| !link.outbound.is_closed())
    }

    /// Generation and sender of the link, if connected
    fn connected_link(&self) -> Option<(u64, mpsc::UnboundedSender<Outbound>)> {
        if self.state.get() != ConnectionState::Connected {
            return None;
        }
        self.lock_link()
            .as_ref()
            .map(|link| (link.generation, link.outbound.clone()))
    }

    fn current_generation(&self) -> Option<u64> {
        self.lock_link().as_ref().map(|link| link.generation)
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.lock_reconnect_task().take() {
            task.abort();
        }
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<ActiveLink>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, ReconnectionScheduler> {
        self.scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_reconnect_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reconnect_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel_reconnect();
        self.heartbeat.stop();
        if let Some(link) = self.lock_link().take() {
            let _ = link.outbound.send(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: "client dropped".to_string(),
            });
        }
        self.correlator
            .cancel_all_now(|method| Error::client_closed(method, "client dropped"));
    }
}

/// Pump events of link `generation` into the client until it closes
async fn read_loop(
    client: Weak<Inner>,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = inbound.recv().await {
        let Some(inner) = client.upgrade() else {
            return;
        };

        match event {
            TransportEvent::Frame(text) => inner.handle_frame(&text).await,
            TransportEvent::Error(e) => {
                tracing::warn!(error = %e, "Transport error");
                if let Some(ref m) = inner.metrics {
                    m.record_error("transport");
                }
            }
            TransportEvent::Closed { code, reason } => {
                inner.handle_closure(generation, code, reason).await;
                return;
            }
        }
    }

    // The transport went away without reporting a close.
    if let Some(inner) = client.upgrade() {
        inner
            .handle_closure(generation, ABNORMAL_CLOSURE, "transport ended".to_string())
            .await;
    }
}

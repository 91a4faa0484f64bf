//! # Event Stream Client
//!
//! Owns the single logical connection to the event endpoint, the
//! subscription registry, and the reconnect state machine.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open ok──▶ Connected
//!      ▲                          │  ▲                     │
//!      │ disconnect()             │  │ timer fires         │ error / closed
//!      │                     error│  │                     ▼
//!      └──────────────────── RetryPending { delay_ms } ◀───┘
//! ```
//!
//! Each attempt runs as a spawned task and each backoff wait as a spawned
//! timer; the client owns both handles and aborts them on `disconnect()`.
//! A generation counter, bumped on every new attempt and on disconnect,
//! makes callbacks from superseded tasks no-ops.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use scout_core::errors::TransportError;
use scout_core::retry::{ReconnectPolicy, apply_jitter};
use scout_core::text::preview;
use scout_settings::StreamSettings;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, trace, warn};

use crate::credentials::CredentialProvider;
use crate::registry::{StreamSubscriber, Subscription, SubscriptionRegistry};
use crate::sse::Frame;
use crate::transport::{Transport, build_stream_url};

/// Longest payload excerpt included in a malformed-frame warning.
const PAYLOAD_PREVIEW_CHARS: usize = 120;

/// Static connection parameters.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Fixed SSE endpoint.
    pub endpoint: String,
    /// Query parameter carrying the credential.
    pub token_param: String,
    /// Backoff parameters.
    pub policy: ReconnectPolicy,
}

impl ClientConfig {
    /// Config for `endpoint` with the default token parameter and policy.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token_param: "token".to_string(),
            policy: ReconnectPolicy::default(),
        }
    }

    /// Use a different backoff policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Config taken from the `stream` settings section.
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            token_param: settings.token_param.clone(),
            policy: settings.reconnect_policy(),
        }
    }
}

/// Observable state of the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not trying to connect.
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// The stream is open and frames are being dispatched.
    Connected,
    /// Waiting to retry after a failure.
    RetryPending {
        /// How long this wait lasts.
        delay_ms: u64,
    },
}

struct Inner {
    active: bool,
    generation: u64,
    connection: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
    retry_delay_ms: u64,
    attempts: u64,
    consecutive_failures: u32,
}

struct Shared {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    registry: Arc<SubscriptionRegistry>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Auto-recovering SSE client.
///
/// Construct once and share through an `Arc`. `connect`, `disconnect` and
/// `reconnect` return immediately and must be called from within a Tokio
/// runtime.
pub struct EventStreamClient {
    shared: Arc<Shared>,
}

impl EventStreamClient {
    /// Create a disconnected client.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let retry_delay_ms = config.policy.initial_delay_ms;
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                credentials,
                registry: Arc::new(SubscriptionRegistry::new()),
                inner: Mutex::new(Inner {
                    active: false,
                    generation: 0,
                    connection: None,
                    retry_timer: None,
                    retry_delay_ms,
                    attempts: 0,
                    consecutive_failures: 0,
                }),
                state_tx,
            }),
        }
    }

    /// Start connecting. No-op while already active.
    pub fn connect(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.active {
            trace!("connect ignored, already active");
            return;
        }
        inner.active = true;
        info!(endpoint = %self.shared.config.endpoint, "event stream starting");
        self.shared.start_attempt(&mut inner);
    }

    /// Stop: cancel any pending retry and close the transport.
    ///
    /// Idempotent. Resets the backoff so a later `connect()` starts cold.
    pub fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        let was_active = inner.active;
        inner.active = false;
        inner.generation += 1;
        if let Some(timer) = inner.retry_timer.take() {
            timer.abort();
        }
        if let Some(connection) = inner.connection.take() {
            connection.abort();
        }
        inner.retry_delay_ms = self.shared.config.policy.initial_delay_ms;
        inner.consecutive_failures = 0;
        self.shared.set_state(ConnectionState::Disconnected);
        if was_active {
            info!("event stream stopped");
        }
    }

    /// Start a fresh attempt now, skipping any backoff wait.
    ///
    /// Used when connectivity returns: the pending retry is cancelled and
    /// the delay goes back to its initial value.
    pub fn reconnect(&self) {
        let mut inner = self.shared.inner.lock();
        inner.active = true;
        inner.retry_delay_ms = self.shared.config.policy.initial_delay_ms;
        inner.consecutive_failures = 0;
        debug!("immediate reconnect requested");
        self.shared.start_attempt(&mut inner);
    }

    /// Register `handler` for `event_type`. Legal at any time.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.registry.subscribe(event_type, handler)
    }

    /// Subscribe surface for consumers.
    pub fn subscriber(&self) -> StreamSubscriber {
        StreamSubscriber::new(Arc::clone(&self.shared.registry))
    }

    /// Parse `frame` and deliver it to the handlers for its event type.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch_frame(&self, frame: &Frame) -> usize {
        self.shared.dispatch_frame(frame)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that observes state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Whether the client intends to stay connected.
    pub fn is_active(&self) -> bool {
        self.shared.inner.lock().active
    }

    /// Whether an attempt or open connection exists.
    pub fn has_transport(&self) -> bool {
        self.shared.inner.lock().connection.is_some()
    }

    /// Whether a backoff timer is waiting to fire.
    pub fn has_pending_retry(&self) -> bool {
        self.shared.inner.lock().retry_timer.is_some()
    }

    /// Delay the next failure will be scheduled with.
    pub fn retry_delay_ms(&self) -> u64 {
        self.shared.inner.lock().retry_delay_ms
    }

    /// Connection attempts started since construction.
    pub fn attempts(&self) -> u64 {
        self.shared.inner.lock().attempts
    }
}

impl std::fmt::Debug for EventStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("EventStreamClient")
            .field("endpoint", &self.shared.config.endpoint)
            .field("active", &inner.active)
            .field("state", &*self.shared.state_tx.borrow())
            .field("retry_delay_ms", &inner.retry_delay_ms)
            .finish_non_exhaustive()
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.active = false;
        inner.generation += 1;
        if let Some(timer) = inner.retry_timer.take() {
            timer.abort();
        }
        if let Some(connection) = inner.connection.take() {
            connection.abort();
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Replace whatever attempt or timer exists with a new attempt.
    fn start_attempt(self: &Arc<Self>, inner: &mut Inner) {
        if let Some(timer) = inner.retry_timer.take() {
            timer.abort();
        }
        if let Some(connection) = inner.connection.take() {
            connection.abort();
        }
        inner.generation += 1;
        inner.attempts += 1;
        let generation = inner.generation;
        debug!(attempt = inner.attempts, "opening event stream");
        self.set_state(ConnectionState::Connecting);
        inner.connection = Some(tokio::spawn(run_connection(Arc::clone(self), generation)));
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.inner.lock();
        inner.active && inner.generation == generation
    }

    /// No credential: give up until the next `connect()`.
    fn abandon(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.active = false;
        let _ = inner.connection.take();
        self.set_state(ConnectionState::Disconnected);
        debug!("no session credential, event stream not opened");
    }

    fn on_open(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if !inner.active || inner.generation != generation {
            return false;
        }
        inner.retry_delay_ms = self.config.policy.initial_delay_ms;
        inner.consecutive_failures = 0;
        self.set_state(ConnectionState::Connected);
        info!(attempt = inner.attempts, "event stream connected");
        true
    }

    fn on_failure(self: &Arc<Self>, generation: u64, err: &TransportError) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            trace!(error = %err, "ignoring failure from superseded attempt");
            return;
        }
        // Our own handle; the task is finishing.
        let _ = inner.connection.take();
        if !inner.active {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        let policy = &self.config.policy;
        let delay_ms = inner.retry_delay_ms;
        inner.retry_delay_ms = policy.next_delay(delay_ms);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let sleep_ms = if policy.jitter_factor > 0.0 {
            apply_jitter(delay_ms, policy.jitter_factor, rand::random::<f64>())
        } else {
            delay_ms
        };

        if err.is_retryable() {
            warn!(
                error = %err,
                category = err.category(),
                failures = inner.consecutive_failures,
                delay_ms = sleep_ms,
                "event stream failed, retrying"
            );
        } else {
            error!(
                error = %err,
                category = err.category(),
                failures = inner.consecutive_failures,
                delay_ms = sleep_ms,
                "event stream failed with a non-transient error, retrying"
            );
        }

        self.set_state(ConnectionState::RetryPending { delay_ms: sleep_ms });
        let shared = Arc::clone(self);
        inner.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            shared.fire_retry(generation);
        }));
    }

    fn fire_retry(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock();
        if !inner.active || inner.generation != generation {
            return;
        }
        // Our own handle; must not be aborted by start_attempt.
        let _ = inner.retry_timer.take();
        self.start_attempt(&mut inner);
    }

    fn dispatch_frame(&self, frame: &Frame) -> usize {
        if frame.data.trim().is_empty() {
            trace!(event_type = %frame.event_type, "dropping frame with empty payload");
            return 0;
        }
        let payload: Value = match serde_json::from_str(&frame.data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    event_type = %frame.event_type,
                    error = %e,
                    data_preview = %preview(&frame.data, PAYLOAD_PREVIEW_CHARS),
                    "dropping frame with malformed payload"
                );
                return 0;
            }
        };
        let handlers = self.registry.dispatch(&frame.event_type, &payload);
        trace!(event_type = %frame.event_type, handlers, "frame dispatched");
        handlers
    }
}

/// Body of one connection attempt.
async fn run_connection(shared: Arc<Shared>, generation: u64) {
    let Some(credential) = shared.credentials.credential().await else {
        shared.abandon(generation);
        return;
    };

    let config = &shared.config;
    let url = match build_stream_url(&config.endpoint, &config.token_param, &credential) {
        Ok(url) => url,
        Err(e) => {
            shared.on_failure(generation, &e);
            return;
        }
    };

    let mut frames = match shared.transport.open(&url).await {
        Ok(frames) => frames,
        Err(e) => {
            shared.on_failure(generation, &e);
            return;
        }
    };
    if !shared.on_open(generation) {
        return;
    }

    loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                if !shared.is_current(generation) {
                    return;
                }
                let _ = shared.dispatch_frame(&frame);
            }
            Some(Err(e)) => {
                shared.on_failure(generation, &e);
                return;
            }
            None => {
                shared.on_failure(generation, &TransportError::Closed);
                return;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

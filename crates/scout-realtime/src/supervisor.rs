//! # Connection Supervisor
//!
//! Binds the client's lifecycle to two external signals: session presence
//! and network reachability.
//!
//! ```text
//!            token present            Connected
//! Stopped ──────────────────▶ Starting ─────────▶ Live
//!    ▲                         │  ▲  ▲              │
//!    │ token absent            │  │  └─ retrying ───┘
//!    │ (from any state)        ▼  │ reachable       │ unreachable
//!    └──────────────────────── Suspended ◀──────────┘
//! ```
//!
//! The transition methods are synchronous so they can be driven directly in
//! tests; [`ConnectionSupervisor::run`] feeds them from watch channels.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{ConnectionState, EventStreamClient};
use crate::credentials::is_usable_token;
use crate::registry::StreamSubscriber;

/// Supervisor lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    /// No session; client disconnected.
    Stopped,
    /// Session present; client connecting or retrying.
    Starting,
    /// Session present and stream open.
    Live,
    /// Session present but network unreachable; client disconnected.
    Suspended,
}

/// Drives an [`EventStreamClient`] from session and reachability signals.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    client: Arc<EventStreamClient>,
    subscriber: StreamSubscriber,
    session_present: bool,
    reachable: bool,
    state_tx: watch::Sender<SupervisorState>,
}

impl ConnectionSupervisor {
    /// Supervisor for `client`, starting `Stopped` with the network assumed
    /// reachable.
    pub fn new(client: Arc<EventStreamClient>) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Stopped);
        let subscriber = client.subscriber();
        Self {
            client,
            subscriber,
            session_present: false,
            reachable: true,
            state_tx,
        }
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes state changes.
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// The stable subscribe surface for consumers.
    ///
    /// Every call returns a handle to the same registry.
    pub fn subscriber(&self) -> StreamSubscriber {
        self.subscriber.clone()
    }

    /// The supervised client.
    pub fn client(&self) -> &Arc<EventStreamClient> {
        &self.client
    }

    fn transition(&self, next: SupervisorState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            info!(from = ?previous, to = ?next, "supervisor state changed");
        }
    }

    /// React to the session token appearing or disappearing.
    pub fn on_session_changed(&mut self, present: bool) {
        if present == self.session_present {
            return;
        }
        self.session_present = present;
        if !present {
            self.client.disconnect();
            self.transition(SupervisorState::Stopped);
        } else if self.reachable {
            self.client.connect();
            self.transition(SupervisorState::Starting);
        } else {
            debug!("session present but network unreachable, deferring connect");
            self.transition(SupervisorState::Suspended);
        }
    }

    /// React to the network becoming reachable or unreachable.
    pub fn on_reachability_changed(&mut self, reachable: bool) {
        if reachable == self.reachable {
            return;
        }
        self.reachable = reachable;
        if !self.session_present {
            return;
        }
        if reachable {
            self.client.reconnect();
            self.transition(SupervisorState::Starting);
        } else {
            self.client.disconnect();
            self.transition(SupervisorState::Suspended);
        }
    }

    /// React to the client's connection state.
    pub fn on_connection_state(&mut self, state: ConnectionState) {
        match (self.state(), state) {
            (SupervisorState::Starting, ConnectionState::Connected) => {
                self.transition(SupervisorState::Live);
            }
            (
                SupervisorState::Live,
                ConnectionState::Connecting | ConnectionState::RetryPending { .. },
            ) => self.transition(SupervisorState::Starting),
            _ => {}
        }
    }

    /// Follow the signals until `cancel` fires or the session channel
    /// closes, then disconnect the client.
    ///
    /// A closed reachability channel leaves the last value in effect. An
    /// empty token counts as no session.
    pub async fn run(
        &mut self,
        mut session: watch::Receiver<Option<String>>,
        mut reachability: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) {
        let mut connection = self.client.watch_state();

        let reachable = *reachability.borrow_and_update();
        self.on_reachability_changed(reachable);
        let present = is_usable_token(session.borrow_and_update().as_deref());
        self.on_session_changed(present);
        let state = *connection.borrow_and_update();
        self.on_connection_state(state);

        let mut reachability_open = true;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = session.changed() => {
                    if changed.is_err() {
                        debug!("session channel closed");
                        break;
                    }
                    let present = is_usable_token(session.borrow_and_update().as_deref());
                    self.on_session_changed(present);
                }
                changed = reachability.changed(), if reachability_open => {
                    if changed.is_err() {
                        debug!("reachability channel closed");
                        reachability_open = false;
                        continue;
                    }
                    let reachable = *reachability.borrow_and_update();
                    self.on_reachability_changed(reachable);
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *connection.borrow_and_update();
                    self.on_connection_state(state);
                }
            }
        }

        self.client.disconnect();
        self.session_present = false;
        self.transition(SupervisorState::Stopped);
    }
}

//! Subscription Session - one logical subscriber
//!
//! A session keeps one filter subscribed across transport losses:
//!
//! ```text
//! Idle ──▶ Connecting ──▶ Active ──▶ Disconnected ──(backoff)──▶ Connecting ...
//!   any state ──close()──▶ Closed
//! ```
//!
//! Delivery is at-most-once. After a reconnect the filter is issued again
//! and only changes committed from then on arrive; nothing missed while
//! disconnected is replayed.

pub mod connector;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use connector::{Connector, LocalConnector, NotificationStream, WsConnector};

use crate::bus::FilterSpec;
use crate::protocol::Notification;
use crate::types::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Disconnected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed wait between a transport loss and the next connect attempt
    pub reconnect_delay: Duration,
    /// Notifications buffered between the transport and the consumer
    pub buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            buffer: 256,
        }
    }
}

/// Move to `next` unless the session is already closed
fn transition(state_tx: &watch::Sender<SessionState>, next: SessionState) -> bool {
    state_tx.send_if_modified(|state| {
        if *state == SessionState::Closed || *state == next {
            return false;
        }
        debug!(from = %state, to = %next, "Session state change");
        *state = next;
        true
    })
}

pub struct SubscriptionSession {
    filter: FilterSpec,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    state_tx: Arc<watch::Sender<SessionState>>,
    events_rx: Option<mpsc::Receiver<Notification>>,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionSession {
    /// Create an idle session; nothing connects until `start`
    pub fn new(connector: Arc<dyn Connector>, filter: FilterSpec, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            filter,
            connector,
            config,
            state_tx: Arc::new(state_tx),
            events_rx: None,
            shutdown_tx,
            task: None,
        }
    }

    /// Create and start a session
    pub fn open(connector: Arc<dyn Connector>, filter: FilterSpec, config: SessionConfig) -> Self {
        let mut session = Self::new(connector, filter, config);
        session.start();
        session
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Wait until the session reaches `target`
    pub async fn wait_for(&self, target: SessionState) -> Result<(), SessionError> {
        let mut rx = self.state_tx.subscribe();
        let reached = rx
            .wait_for(|s| *s == target || *s == SessionState::Closed)
            .await
            .map_err(|_| SessionError::Closed)?;
        if *reached == target {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    /// Spawn the connection loop; no-op unless the session is idle
    pub fn start(&mut self) {
        if self.state() != SessionState::Idle || self.task.is_some() {
            return;
        }
        let (events_tx, events_rx) = mpsc::channel(self.config.buffer.max(1));
        self.events_rx = Some(events_rx);
        self.task = Some(tokio::spawn(run_session(
            Arc::clone(&self.connector),
            self.filter.clone(),
            self.config.reconnect_delay,
            Arc::clone(&self.state_tx),
            events_tx,
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Next notification; `None` once the session is closed
    pub async fn next(&mut self) -> Option<Notification> {
        self.events_rx.as_mut()?.recv().await
    }

    /// Close the session.
    ///
    /// Stops the reconnect loop, releases the transport (which removes the
    /// subscription on the bus) and discards undelivered notifications.
    pub async fn close(&mut self) {
        let _ = self.shutdown_tx.send(());
        transition(&self.state_tx, SessionState::Closed);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(mut rx) = self.events_rx.take() {
            rx.close();
            while rx.try_recv().is_ok() {}
        }
        info!(filter = ?self.filter, "Session closed");
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_session(
    connector: Arc<dyn Connector>,
    filter: FilterSpec,
    reconnect_delay: Duration,
    state_tx: Arc<watch::Sender<SessionState>>,
    events_tx: mpsc::Sender<Notification>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    'session: loop {
        if *state_tx.borrow() == SessionState::Closed {
            break;
        }
        transition(&state_tx, SessionState::Connecting);

        tokio::select! {
            _ = shutdown_rx.recv() => break 'session,
            opened = connector.open(&filter) => match opened {
                Ok(mut stream) => {
                    transition(&state_tx, SessionState::Active);
                    info!(filter = ?filter, "Subscription active");
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => break 'session,
                            item = stream.next() => match item {
                                Some(Ok(notification)) => {
                                    if events_tx.send(notification).await.is_err() {
                                        // consumer is gone
                                        break 'session;
                                    }
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "Subscription transport error");
                                    break;
                                }
                                None => {
                                    warn!("Subscription transport closed");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Subscribe attempt failed");
                }
            }
        }

        transition(&state_tx, SessionState::Disconnected);
        tokio::select! {
            _ = shutdown_rx.recv() => break 'session,
            _ = tokio::time::sleep(reconnect_delay) => {
                debug!("Reconnecting subscription");
            }
        }
    }

    transition(&state_tx, SessionState::Closed);
}

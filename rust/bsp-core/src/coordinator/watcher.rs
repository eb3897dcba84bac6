// rust/bsp-core/src/coordinator/watcher.rs

//! Connection state machine fed by store events.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> SessionExpired
//! ```
//!
//! `SessionExpired` is terminal. The current state is published on a
//! `tokio::sync::watch` channel, so the session's connect wait is released
//! exactly once when the first connected event arrives; later connected
//! events change nothing.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::store::{EventType, KeeperState, WatchedEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal. The session and its ephemeral nodes are gone.
    SessionExpired,
}

impl ConnectionState {
    /// Connected or expired: nothing more to wait for.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Connected | Self::SessionExpired)
    }
}

#[derive(Debug)]
pub struct ConnectionWatcher {
    state: watch::Sender<ConnectionState>,
}

impl Default for ConnectionWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionWatcher {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { state }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Marks the start of a connect attempt.
    pub fn mark_connecting(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        })
    }

    /// Moves to the terminal expired state. Returns false if already there.
    pub fn mark_expired(&self, reason: &str) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::SessionExpired {
                false
            } else {
                *state = ConnectionState::SessionExpired;
                true
            }
        });
        if changed {
            tracing::error!(reason, "coordination session expired");
        }
        changed
    }

    /// Applies one store event. Returns whether the state changed.
    ///
    /// Never blocks. Events that do not drive the state machine are logged
    /// and dropped.
    pub fn process(&self, event: &WatchedEvent) -> bool {
        match (event.path.as_deref(), event.event_type, event.state) {
            (None, EventType::None, KeeperState::SyncConnected) => {
                let changed = self.state.send_if_modified(|state| match state {
                    ConnectionState::Disconnected | ConnectionState::Connecting => {
                        *state = ConnectionState::Connected;
                        true
                    }
                    _ => false,
                });
                if changed {
                    tracing::info!("connected to coordination store");
                }
                changed
            }
            (None, EventType::None, KeeperState::Expired) => self.mark_expired("store event"),
            (None, EventType::None, KeeperState::Disconnected) => {
                tracing::warn!(state = ?self.state(), "store reported disconnect");
                false
            }
            (path, event_type, state) => {
                tracing::debug!(?path, ?event_type, ?state, "ignoring store event");
                false
            }
        }
    }

    /// Consumes `events` until the store drops its sender.
    pub fn spawn(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<WatchedEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.process(&event);
            }
            tracing::debug!("store event channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> WatchedEvent {
        WatchedEvent::connection(KeeperState::SyncConnected)
    }

    #[test]
    fn test_connected_signal_fires_once() {
        let watcher = ConnectionWatcher::new();
        let mut rx = watcher.subscribe();

        assert!(watcher.mark_connecting());
        assert!(watcher.process(&connected()));
        assert_eq!(watcher.state(), ConnectionState::Connected);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(!watcher.process(&connected()));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_expired_is_terminal() {
        let watcher = ConnectionWatcher::new();
        watcher.process(&connected());

        assert!(watcher.mark_expired("heartbeat"));
        assert!(!watcher.mark_expired("heartbeat"));
        assert!(!watcher.process(&connected()));
        assert!(!watcher.mark_connecting());
        assert_eq!(watcher.state(), ConnectionState::SessionExpired);
    }

    #[test]
    fn test_expiry_event() {
        let watcher = ConnectionWatcher::new();
        watcher.process(&connected());
        assert!(watcher.process(&WatchedEvent::connection(KeeperState::Expired)));
        assert_eq!(watcher.state(), ConnectionState::SessionExpired);
    }

    #[test]
    fn test_irrelevant_events_are_ignored() {
        let watcher = ConnectionWatcher::new();
        watcher.mark_connecting();

        assert!(!watcher.process(&WatchedEvent::node("/_bsp/a", EventType::NodeCreated)));
        assert!(!watcher.process(&WatchedEvent::connection(KeeperState::Disconnected)));
        // a node event with a connected state is not the handshake
        assert!(!watcher.process(&WatchedEvent::node("/_bsp/a", EventType::NodeDataChanged)));
        assert_eq!(watcher.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_dispatch_loop() {
        let watcher = Arc::new(ConnectionWatcher::new());
        let mut rx = watcher.subscribe();
        let (tx, events) = mpsc::unbounded_channel();
        let handle = watcher.clone().spawn(events);

        tx.send(WatchedEvent::node("/x", EventType::NodeDeleted)).unwrap();
        tx.send(connected()).unwrap();
        let state = *rx.wait_for(|state| state.is_settled()).await.unwrap();
        assert_eq!(state, ConnectionState::Connected);

        drop(tx);
        handle.await.unwrap();
    }
}

// rust/bsp-core/src/coordinator/heartbeat.rs

//! Background keep-alive for the coordination session.
//!
//! Every interval the monitor checks that the root node exists. An expired
//! session ends the loop with a fatal error and flips the
//! [`ConnectionWatcher`] to `SessionExpired`; any other store failure is
//! logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::paths::NodePath;
use super::watcher::ConnectionWatcher;
use crate::error::{CoordinationError, Result};
use crate::store::{CoordinationStore, StoreError};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Extra time `stop` allows on top of one interval.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

// Only every Nth transient failure is logged at info.
const TRANSIENT_LOG_EVERY: u64 = 20;

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new(HEARTBEAT_INTERVAL)
    }
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the keep-alive loop. Does nothing if already started.
    pub fn start(
        &mut self,
        store: Arc<dyn CoordinationStore>,
        root: NodePath,
        watcher: Arc<ConnectionWatcher>,
    ) {
        if self.handle.is_some() {
            tracing::warn!("heartbeat already started");
            return;
        }
        tracing::info!(interval_ms = self.interval.as_millis() as u64, root = %root, "starting heartbeat");
        self.handle = Some(tokio::spawn(run(
            store,
            root,
            watcher,
            self.interval,
            self.cancel.clone(),
        )));
    }

    /// Cancels the loop and waits up to one interval plus [`STOP_GRACE`]
    /// for it to finish, aborting it after that.
    ///
    /// Safe to call repeatedly and before `start`.
    ///
    /// # Errors
    ///
    /// Returns the fatal error the loop ended with, if any.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.interval + STOP_GRACE, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(CoordinationError::command_with_source("heartbeat task failed", e)),
            Err(_) => {
                tracing::warn!("heartbeat did not stop in time, aborting");
                handle.abort();
                Ok(())
            }
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    store: Arc<dyn CoordinationStore>,
    root: NodePath,
    watcher: Arc<ConnectionWatcher>,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut transient_failures: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = store.exists(root.as_str()) => outcome,
        };

        match outcome {
            Ok(_) => tracing::trace!(root = %root, "heartbeat ok"),
            Err(StoreError::SessionExpired) => {
                watcher.mark_expired("heartbeat");
                return Err(CoordinationError::session_expired(format!("heartbeat on '{root}'")));
            }
            Err(e) => {
                transient_failures += 1;
                if transient_failures % TRANSIENT_LOG_EVERY == 1 {
                    tracing::info!(error = %e, failures = transient_failures, "heartbeat check failed");
                } else {
                    tracing::debug!(error = %e, failures = transient_failures, "heartbeat check failed");
                }
            }
        }
    }

    tracing::debug!("heartbeat stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::paths::PathScheme;
    use crate::coordinator::watcher::ConnectionState;
    use crate::store::MemoryStore;

    const INTERVAL: Duration = Duration::from_secs(15);

    fn monitor_on(store: &MemoryStore) -> (HeartbeatMonitor, Arc<ConnectionWatcher>) {
        let watcher = Arc::new(ConnectionWatcher::new());
        let mut monitor = HeartbeatMonitor::new(INTERVAL);
        monitor.start(Arc::new(store.clone()), PathScheme::default().root_node(), watcher.clone());
        (monitor, watcher)
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let mut monitor = HeartbeatMonitor::default();
        assert!(!monitor.is_running());
        monitor.stop().await.unwrap();
        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_prompt_and_idempotent() {
        let store = MemoryStore::new();
        let (mut monitor, _) = monitor_on(&store);
        assert!(monitor.is_running());

        let started = Instant::now();
        monitor.stop().await.unwrap();
        assert!(started.elapsed() < INTERVAL);
        assert!(!monitor.is_running());
        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_absorbed() {
        let store = MemoryStore::new();
        store.fail_next_exists(StoreError::connection_loss("blip"));
        store.fail_next_exists(StoreError::other("busy"));
        let (mut monitor, watcher) = monitor_on(&store);

        tokio::time::sleep(INTERVAL * 4).await;

        assert!(monitor.is_running());
        assert_ne!(watcher.state(), ConnectionState::SessionExpired);
        monitor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expiry_is_fatal() {
        let store = MemoryStore::new();
        let (mut monitor, watcher) = monitor_on(&store);

        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert!(monitor.is_running());

        store.expire_session();
        let mut state = watcher.subscribe();
        state
            .wait_for(|state| *state == ConnectionState::SessionExpired)
            .await
            .unwrap();

        let err = monitor.stop().await.unwrap_err();
        assert!(matches!(err, CoordinationError::SessionExpired { .. }));
    }
}

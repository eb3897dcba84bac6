// rust/bsp-core/src/coordinator/session.rs

//! The process-wide coordination session.
//!
//! [`Session::open`] connects through a [`StoreConnector`], retrying the
//! connect call, and then waits for the store's handshake event before
//! handing out the session. Everything else (payloads, results, barriers,
//! heartbeat) hangs off the one session and shares its store handle and
//! chunk pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::barrier::IterationBarrier;
use super::heartbeat::HeartbeatMonitor;
use super::paths::PathScheme;
use super::payload::PayloadStore;
use super::pool::ChunkPool;
use super::quorum::QuorumCriteria;
use super::results::IterationResults;
use super::retry::RetryPolicy;
use super::watcher::{ConnectionState, ConnectionWatcher};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinationError, Result};
use crate::store::{CoordinationStore, EventSender, StoreConnector, StoreError};

/// How long `close` lets in-flight chunk tasks finish.
pub const POOL_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Session {
    config: CoordinatorConfig,
    store: Arc<dyn CoordinationStore>,
    paths: PathScheme,
    watcher: Arc<ConnectionWatcher>,
    watcher_task: JoinHandle<()>,
    pool: ChunkPool,
    payloads: PayloadStore,
    heartbeat: HeartbeatMonitor,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.store.session_id())
            .field("servers", &self.config.store.servers)
            .field("state", &self.watcher.state())
            .field("heartbeat_running", &self.heartbeat.is_running())
            .finish()
    }
}

impl Session {
    /// Connects to the store and waits until the session is established.
    ///
    /// The connect call is retried up to `store.max_connect_attempts` times,
    /// `store.retry_wait_ms` apart. The handshake wait is bounded by the
    /// session timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::Config`] for an invalid config,
    /// [`CoordinationError::Unavailable`] when no connection or handshake
    /// could be made, and [`CoordinationError::SessionExpired`] if the
    /// session expired before it was established.
    pub async fn open(config: &CoordinatorConfig, connector: &dyn StoreConnector) -> Result<Self> {
        config.validate()?;

        let watcher = Arc::new(ConnectionWatcher::new());
        let mut state = watcher.subscribe();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let watcher_task = watcher.clone().spawn(events_rx);

        let store = match connect(config, connector, &watcher, events_tx).await {
            Ok(store) => store,
            Err(e) => {
                watcher_task.abort();
                return Err(e);
            }
        };

        let handshake = tokio::time::timeout(config.store.session_timeout(), async {
            state.wait_for(|state| state.is_settled()).await.map(|state| *state)
        })
        .await;

        let failure = match handshake {
            Ok(Ok(ConnectionState::Connected)) => None,
            Ok(Ok(_)) => Some(CoordinationError::session_expired(
                "session expired before the handshake completed",
            )),
            Ok(Err(_)) => Some(CoordinationError::unavailable(
                config.store.servers.clone(),
                config.store.max_connect_attempts,
                Some(StoreError::other("connection watcher stopped")),
            )),
            Err(_) => Some(CoordinationError::unavailable(
                config.store.servers.clone(),
                config.store.max_connect_attempts,
                Some(StoreError::connection_loss(format!(
                    "no handshake within {:?}",
                    config.store.session_timeout()
                ))),
            )),
        };
        if let Some(e) = failure {
            if let Err(close_err) = store.close().await {
                tracing::debug!(error = %close_err, "closing half-open session failed");
            }
            watcher_task.abort();
            return Err(e);
        }

        let paths = PathScheme::new(config.store.root_node.clone());
        let pool = ChunkPool::new(config.payload.pool_size);
        let payloads = PayloadStore::from_config(store.clone(), pool.clone(), &config.payload);

        let mut session = Self {
            config: config.clone(),
            store,
            paths,
            watcher,
            watcher_task,
            pool,
            payloads,
            heartbeat: HeartbeatMonitor::new(config.heartbeat.interval()),
        };
        if config.heartbeat.enabled {
            session.start_heartbeat();
        }

        tracing::info!(
            session_id = session.session_id(),
            servers = %config.store.servers,
            root = %session.paths.root_node(),
            "coordination session established"
        );
        Ok(session)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn paths(&self) -> &PathScheme {
        &self.paths
    }

    pub fn payloads(&self) -> &PayloadStore {
        &self.payloads
    }

    pub fn results(&self) -> IterationResults {
        IterationResults::new(self.paths.clone(), self.payloads.clone())
    }

    pub fn barrier(&self) -> IterationBarrier {
        IterationBarrier::new(self.store.clone(), self.paths.clone(), self.retry_policy())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.retry)
    }

    /// Quorum criteria for `total` participants from the configured ratio
    /// and time budget.
    pub fn quorum(&self, total: usize) -> QuorumCriteria {
        QuorumCriteria::from_config(total, &self.config.quorum)
    }

    pub fn session_id(&self) -> u64 {
        self.store.session_id()
    }

    pub fn state(&self) -> ConnectionState {
        self.watcher.state()
    }

    /// State updates, for supervisors that want to react to expiry.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.watcher.subscribe()
    }

    /// Fails once the session is known to have expired.
    pub fn check_live(&self) -> Result<()> {
        match self.state() {
            ConnectionState::SessionExpired => Err(CoordinationError::session_expired(format!(
                "session {} expired",
                self.session_id()
            ))),
            _ => Ok(()),
        }
    }

    /// Starts the keep-alive loop. No-op if it is already running.
    pub fn start_heartbeat(&mut self) {
        self.heartbeat
            .start(self.store.clone(), self.paths.root_node(), self.watcher.clone());
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    /// Stops the heartbeat, closes the store session and drains the chunk
    /// pool, giving in-flight chunk tasks [`POOL_SHUTDOWN_GRACE`] before
    /// cancelling them.
    ///
    /// # Errors
    ///
    /// Returns the store's close failure, after all other cleanup ran.
    pub async fn close(mut self) -> Result<()> {
        if let Err(e) = self.heartbeat.stop().await {
            tracing::warn!(error = %e, "heartbeat ended with an error");
        }

        let closed = self.store.close().await.map_err(|e| {
            CoordinationError::store("close", self.paths.root_node(), e)
        });

        if !self.pool.shutdown(POOL_SHUTDOWN_GRACE).await {
            tracing::warn!("chunk tasks cancelled at session close");
        }
        self.watcher_task.abort();

        tracing::info!(session_id = self.session_id(), "coordination session closed");
        closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.watcher_task.abort();
    }
}

async fn connect(
    config: &CoordinatorConfig,
    connector: &dyn StoreConnector,
    watcher: &ConnectionWatcher,
    events: EventSender,
) -> Result<Arc<dyn CoordinationStore>> {
    let servers = config.store.servers.as_str();
    let attempts = config.store.max_connect_attempts;
    let mut last_error = None;

    for attempt in 1..=attempts {
        watcher.mark_connecting();
        match connector
            .connect(servers, config.store.session_timeout(), events.clone())
            .await
        {
            Ok(store) => {
                tracing::debug!(attempt, servers, "store connection opened");
                return Ok(store);
            }
            Err(e) => {
                tracing::warn!(attempt, attempts, servers, error = %e, "connecting to store failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(config.store.retry_wait()).await;
                }
            }
        }
    }

    tracing::error!(servers, attempts, "coordination store unavailable");
    Err(CoordinationError::unavailable(servers, attempts, last_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnector, MemoryStore};
    use bytes::Bytes;

    fn config() -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        config.store.servers = "mem:2181".to_string();
        config.store.retry_wait_ms = 10;
        config.payload.node_data_limit = 8;
        config
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let memory = MemoryStore::new();
        let connector = MemoryConnector::new(&memory);

        let session = Session::open(&config(), &connector).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.check_live().is_ok());
        assert!(!session.heartbeat_running());

        let handle = connector.last_session().unwrap();
        assert_eq!(session.session_id(), handle.session_id());

        session.close().await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let memory = MemoryStore::new();
        let connector = MemoryConnector::new(&memory);

        let err = Session::open(&CoordinatorConfig::default(), &connector).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Config { .. }));
        assert!(connector.last_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_retried() {
        let memory = MemoryStore::new();
        let connector = MemoryConnector::new(&memory).fail_first(2);

        let session = Session::open(&config(), &connector).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_after_attempts() {
        let memory = MemoryStore::new();
        let connector = MemoryConnector::new(&memory).fail_first(10);
        let mut config = config();
        config.store.max_connect_attempts = 3;

        let err = Session::open(&config, &connector).await.unwrap_err();
        match err {
            CoordinationError::Unavailable { attempts, source, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, Some(StoreError::ConnectionLoss { .. })));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let memory = MemoryStore::new();
        let connector = MemoryConnector::new(&memory).without_handshake();
        let mut config = config();
        config.store.session_timeout_ms = 500;

        let err = Session::open(&config, &connector).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Unavailable { .. }));
        assert!(connector.last_session().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_results_through_session() {
        let memory = MemoryStore::new();
        let connector = MemoryConnector::new(&memory);
        let session = Session::open(&config(), &connector).await.unwrap();

        let payload = Bytes::from_static(b"larger than eight bytes");
        let results = session.results();
        assert!(results.publish_master("app", 1, payload.clone()).await.unwrap());
        assert_eq!(results.read_master("app", 1).await.unwrap(), Some(payload));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_check_live_after_expiry() {
        let memory = MemoryStore::new();
        let connector = MemoryConnector::new(&memory);
        let session = Session::open(&config(), &connector).await.unwrap();
        let mut state = session.subscribe_state();

        connector.last_session().unwrap().expire_session();
        state
            .wait_for(|state| *state == ConnectionState::SessionExpired)
            .await
            .unwrap();

        assert!(matches!(
            session.check_live(),
            Err(CoordinationError::SessionExpired { .. })
        ));
        drop(session);
    }
}

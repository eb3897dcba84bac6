// rust/bsp-core/src/store/memory.rs

//! In-process znode store.
//!
//! `MemoryStore` keeps a strongly consistent node tree behind a mutex and
//! honours the same create-or-fail, ephemeral and parent rules as an external
//! ensemble. Several handles (sessions) can share one tree. It backs
//! single-process runs and tests, and carries a few fault-injection hooks for
//! the latter.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::traits::{
    CoordinationStore, CreateMode, EventSender, KeeperState, StoreConnector, StoreError,
    WatchedEvent,
};

#[derive(Debug)]
struct Znode {
    data: Option<Bytes>,
    mode: CreateMode,
    owner: u64,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: Mutex<BTreeMap<String, Znode>>,
    next_session: AtomicU64,
    read_delays: Mutex<HashMap<String, Duration>>,
    create_failures: Mutex<HashMap<String, StoreError>>,
    exists_failures: Mutex<VecDeque<StoreError>>,
}

impl Tree {
    fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, Znode>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drop_ephemerals(&self, session_id: u64) {
        self.nodes()
            .retain(|_, node| !(node.mode == CreateMode::Ephemeral && node.owner == session_id));
    }
}

#[derive(Debug, Default)]
struct SessionFlags {
    closed: AtomicBool,
    expired: AtomicBool,
}

/// A session handle onto a shared in-memory node tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tree: Arc<Tree>,
    session_id: u64,
    flags: Arc<SessionFlags>,
    events: Option<EventSender>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty tree and a first session on it.
    pub fn new() -> Self {
        let tree = Arc::new(Tree::default());
        Self::open(tree, None)
    }

    fn open(tree: Arc<Tree>, events: Option<EventSender>) -> Self {
        let session_id = tree.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        Self {
            tree,
            session_id,
            flags: Arc::new(SessionFlags::default()),
            events,
        }
    }

    /// Opens another session on the same tree.
    pub fn new_session(&self, events: Option<EventSender>) -> Self {
        Self::open(self.tree.clone(), events)
    }

    /// Delays every `get_data` on `path` by `delay`.
    pub fn set_read_delay(&self, path: impl Into<String>, delay: Duration) {
        self.tree
            .read_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), delay);
    }

    /// Makes every `create` of `path` fail with `error`.
    pub fn fail_create(&self, path: impl Into<String>, error: StoreError) {
        self.tree
            .create_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), error);
    }

    /// Makes the next `exists` call (from any session) fail with `error`.
    pub fn fail_next_exists(&self, error: StoreError) {
        self.tree
            .exists_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Expires this session: ephemeral nodes go away, every further call
    /// fails with [`StoreError::SessionExpired`], and an expiry event is
    /// pushed to the session's watcher.
    pub fn expire_session(&self) {
        if self.flags.expired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tree.drop_ephemerals(self.session_id);
        if let Some(events) = &self.events {
            let _ = events.send(WatchedEvent::connection(KeeperState::Expired));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::SeqCst)
    }

    /// All node paths currently in the tree, sorted.
    pub fn node_paths(&self) -> Vec<String> {
        self.tree.nodes().keys().cloned().collect()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.flags.expired.load(Ordering::SeqCst) {
            return Err(StoreError::SessionExpired);
        }
        if self.flags.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

fn check_path(path: &str) -> Result<(), StoreError> {
    let well_formed = path.starts_with('/')
        && path.len() > 1
        && !path.ends_with('/')
        && !path.contains("//");
    if well_formed {
        Ok(())
    } else {
        Err(StoreError::other(format!("invalid node path '{path}'")))
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create(
        &self,
        path: &str,
        data: Option<Bytes>,
        mode: CreateMode,
        recursive: bool,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        check_path(path)?;

        if let Some(error) = self
            .tree
            .create_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Err(error.clone());
        }

        let mut nodes = self.tree.nodes();
        if nodes.contains_key(path) {
            return Err(StoreError::node_exists(path));
        }

        let parent = parent_of(path);
        if parent != "/" {
            match nodes.get(parent) {
                Some(node) if node.mode == CreateMode::Ephemeral => {
                    return Err(StoreError::other(format!(
                        "ephemeral node '{parent}' cannot have children"
                    )));
                }
                Some(_) => {}
                None if recursive => {
                    let mut end = 0;
                    while let Some(offset) = parent[end + 1..].find('/') {
                        end += 1 + offset;
                        nodes.entry(parent[..end].to_string()).or_insert(Znode {
                            data: None,
                            mode: CreateMode::Persistent,
                            owner: self.session_id,
                        });
                    }
                    nodes.entry(parent.to_string()).or_insert(Znode {
                        data: None,
                        mode: CreateMode::Persistent,
                        owner: self.session_id,
                    });
                }
                None => return Err(StoreError::no_node(parent)),
            }
        }

        nodes.insert(
            path.to_string(),
            Znode {
                data,
                mode,
                owner: self.session_id,
            },
        );
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Option<Bytes>, StoreError> {
        self.ensure_open()?;

        let delay = self
            .tree
            .read_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            self.ensure_open()?;
        }

        self.tree
            .nodes()
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| StoreError::no_node(path))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        self.ensure_open()?;

        let nodes = self.tree.nodes();
        if path != "/" && !nodes.contains_key(path) {
            return Err(StoreError::no_node(path));
        }

        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.ensure_open()?;

        if let Some(error) = self
            .tree
            .exists_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            return Err(error);
        }

        Ok(path == "/" || self.tree.nodes().contains_key(path))
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.flags.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.tree.drop_ephemerals(self.session_id);
        Ok(())
    }

    fn session_id(&self) -> u64 {
        self.session_id
    }
}

/// Hands out [`MemoryStore`] sessions that share one tree.
#[derive(Debug)]
pub struct MemoryConnector {
    seed: MemoryStore,
    failures_left: AtomicU32,
    announce: bool,
    sessions: Mutex<Vec<MemoryStore>>,
}

impl MemoryConnector {
    /// Connects onto the tree behind `store`.
    pub fn new(store: &MemoryStore) -> Self {
        Self {
            seed: store.clone(),
            failures_left: AtomicU32::new(0),
            announce: true,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Fails the first `count` connect calls with a connection loss.
    #[must_use]
    pub fn fail_first(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Never announces the handshake, leaving sessions in `Connecting`.
    #[must_use]
    pub fn without_handshake(mut self) -> Self {
        self.announce = false;
        self
    }

    /// The most recently opened session.
    pub fn last_session(&self) -> Option<MemoryStore> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(
        &self,
        servers: &str,
        _session_timeout: Duration,
        events: EventSender,
    ) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        if servers.trim().is_empty() {
            return Err(StoreError::connection_loss("no servers given"));
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::connection_loss(format!(
                "connection refused by {servers}"
            )));
        }

        let session = self.seed.new_session(Some(events.clone()));
        if self.announce {
            let _ = events.send(WatchedEvent::connection(KeeperState::SyncConnected));
        }
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
        Ok(Arc::new(session))
    }
}

// rust/bsp-core/src/store/traits.rs

//! Contract between the coordination core and the external znode store.
//!
//! The store is strongly consistent, hierarchical, and enforces a per-node
//! payload limit. Implementations translate their native failures into
//! [`StoreError`]; the core never retries a store call on its own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Lifetime of a created node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Survives the session that created it.
    Persistent,
    /// Removed when the creating session closes or expires.
    Ephemeral,
}

/// Failure reported by a store operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("node '{path}' does not exist")]
    NoNode { path: String },

    #[error("node '{path}' already exists")]
    NodeExists { path: String },

    #[error("session expired")]
    SessionExpired,

    #[error("connection lost: {message}")]
    ConnectionLoss { message: String },

    #[error("store handle is closed")]
    Closed,

    #[error("{message}")]
    Other { message: String },
}

impl StoreError {
    pub fn no_node(path: impl Into<String>) -> Self {
        Self::NoNode { path: path.into() }
    }

    pub fn node_exists(path: impl Into<String>) -> Self {
        Self::NodeExists { path: path.into() }
    }

    pub fn connection_loss(message: impl Into<String>) -> Self {
        Self::ConnectionLoss {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Kind of change carried by a [`WatchedEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Connection-level event, not tied to a node.
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// Connection state reported alongside an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperState {
    Disconnected,
    SyncConnected,
    Expired,
}

/// Asynchronous notification pushed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub path: Option<String>,
    pub event_type: EventType,
    pub state: KeeperState,
}

impl WatchedEvent {
    /// A connection-state event (no path, no node event type).
    pub fn connection(state: KeeperState) -> Self {
        Self {
            path: None,
            event_type: EventType::None,
            state,
        }
    }

    /// A node event delivered while the connection is healthy.
    pub fn node(path: impl Into<String>, event_type: EventType) -> Self {
        Self {
            path: Some(path.into()),
            event_type,
            state: KeeperState::SyncConnected,
        }
    }
}

/// Channel the store pushes [`WatchedEvent`]s into.
pub type EventSender = mpsc::UnboundedSender<WatchedEvent>;

/// Operations the coordination core needs from the store.
///
/// This trait is object-safe and is shared as `Arc<dyn CoordinationStore>`.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Creates a node. Fails with [`StoreError::NodeExists`] if it is already
    /// present; this is create-or-fail, not upsert.
    ///
    /// With `recursive`, missing ancestors are created as empty persistent
    /// nodes first. Without it, a missing parent is [`StoreError::NoNode`].
    async fn create(
        &self,
        path: &str,
        data: Option<Bytes>,
        mode: CreateMode,
        recursive: bool,
    ) -> Result<(), StoreError>;

    /// Returns the node payload. `None` marks a node created without data.
    async fn get_data(&self, path: &str) -> Result<Option<Bytes>, StoreError>;

    /// Lists child names of a node, in no particular order.
    async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Closes the session. Ephemeral nodes owned by it are removed.
    async fn close(&self) -> Result<(), StoreError>;

    /// Identifier of the session backing this handle.
    fn session_id(&self) -> u64;
}

/// Opens sessions against a store ensemble.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Starts a session. Returning `Ok` does not mean the handshake finished:
    /// the store announces that with a [`KeeperState::SyncConnected`]
    /// connection event on `events`.
    async fn connect(
        &self,
        servers: &str,
        session_timeout: Duration,
        events: EventSender,
    ) -> Result<Arc<dyn CoordinationStore>, StoreError>;
}

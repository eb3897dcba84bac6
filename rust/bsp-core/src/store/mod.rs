// rust/bsp-core/src/store/mod.rs

//! Coordination store abstraction.
//!
//! The store itself is an external collaborator: a strongly consistent,
//! hierarchical key/value service with watch notifications and a hard
//! per-node payload limit. This module defines the contract the core relies
//! on ([`CoordinationStore`], [`StoreConnector`]) and ships an in-process
//! implementation ([`MemoryStore`]) for single-process runs and tests.
//!
//! # Example
//!
//! ```no_run
//! use bsp_core::store::{CoordinationStore, CreateMode, MemoryStore};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), bsp_core::store::StoreError> {
//! let store = MemoryStore::new();
//! store.create("/_bsp/app-1", Some(Bytes::from_static(b"hello")), CreateMode::Persistent, true).await?;
//! let data = store.get_data("/_bsp/app-1").await?;
//! assert_eq!(data.as_deref(), Some(&b"hello"[..]));
//! # Ok(())
//! # }
//! ```

mod memory;
mod traits;

pub use memory::{MemoryConnector, MemoryStore};
pub use traits::{
    CoordinationStore, CreateMode, EventSender, EventType, KeeperState, StoreConnector,
    StoreError, WatchedEvent,
};

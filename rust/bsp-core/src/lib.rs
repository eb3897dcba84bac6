// rust/bsp-core/src/lib.rs

//! BSP coordination core.
//!
//! Masters and workers of a bulk-synchronous-parallel job exchange
//! per-iteration results and synchronize on barriers through a strongly
//! consistent znode store. This crate provides the session handling, node
//! layout, payload splitting, retry and quorum logic they share.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod store;
pub mod telemetry;

// Re-export commonly used types for convenience
pub use config::CoordinatorConfig;
pub use coordinator::{
    ConnectionState, IterationBarrier, IterationResults, PathScheme, PayloadStore,
    QuorumCriteria, RetryCommand, RetryPolicy, Session,
};
pub use error::{CoordinationError, Result};
pub use store::{CoordinationStore, CreateMode, MemoryConnector, MemoryStore, StoreConnector, StoreError};

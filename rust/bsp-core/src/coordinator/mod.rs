// rust/bsp-core/src/coordinator/mod.rs

//! BSP coordination over a znode store.
//!
//! - [`paths`]: node layout for master, worker and election state
//! - [`payload`]: splitting payloads over the node data limit
//! - [`retry`] and [`quorum`]: retry-until-true commands and the barrier rule
//! - [`session`]: the connection, its watcher and heartbeat
//! - [`barrier`] and [`results`]: per-iteration synchronization and results

pub mod barrier;
pub mod heartbeat;
pub mod paths;
pub mod payload;
pub mod pool;
pub mod quorum;
pub mod results;
pub mod retry;
pub mod session;
pub mod watcher;

// Re-exports
pub use barrier::IterationBarrier;
pub use heartbeat::HeartbeatMonitor;
pub use paths::{validate_segment, NodePath, PathScheme};
pub use payload::PayloadStore;
pub use pool::ChunkPool;
pub use quorum::{is_terminated, QuorumCriteria};
pub use results::IterationResults;
pub use retry::{Backoff, RetryCommand, RetryPolicy};
pub use session::Session;
pub use watcher::{ConnectionState, ConnectionWatcher};

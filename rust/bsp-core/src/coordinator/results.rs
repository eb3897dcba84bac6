// rust/bsp-core/src/coordinator/results.rs

//! Per-iteration master and worker results.

use bytes::Bytes;

use super::paths::PathScheme;
use super::payload::PayloadStore;
use crate::error::Result;
use crate::store::CreateMode;

/// Publishes and reads iteration results through the path scheme.
///
/// Results are opaque bytes; encoding them is up to the caller.
#[derive(Debug, Clone)]
pub struct IterationResults {
    paths: PathScheme,
    payloads: PayloadStore,
}

impl IterationResults {
    pub fn new(paths: PathScheme, payloads: PayloadStore) -> Self {
        Self { paths, payloads }
    }

    /// Stores the master result of `iteration`. Returns whether it was split.
    pub async fn publish_master(&self, app_id: &str, iteration: u32, result: Bytes) -> Result<bool> {
        let node = self.paths.master_node(app_id, iteration);
        let split = self.paths.master_split_node(app_id, iteration);
        let was_split = self
            .payloads
            .write(node.as_str(), split.as_str(), result, CreateMode::Persistent)
            .await?;
        tracing::debug!(app_id, iteration, split = was_split, "published master result");
        Ok(was_split)
    }

    pub async fn read_master(&self, app_id: &str, iteration: u32) -> Result<Option<Bytes>> {
        let node = self.paths.master_node(app_id, iteration);
        let split = self.paths.master_split_node(app_id, iteration);
        self.payloads.read(node.as_str(), split.as_str()).await
    }

    /// Master result of `iteration - 1`, as workers read it at the start of
    /// `iteration`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoordinationError::InvalidIteration`] for iteration 0.
    pub async fn read_previous_master(&self, app_id: &str, iteration: u32) -> Result<Option<Bytes>> {
        let node = self.paths.previous_master_node(app_id, iteration)?;
        let split = self.paths.master_split_node(app_id, iteration - 1);
        self.payloads.read(node.as_str(), split.as_str()).await
    }

    /// Stores one worker's result of `iteration`. Returns whether it was split.
    pub async fn publish_worker(
        &self,
        app_id: &str,
        container_id: &str,
        iteration: u32,
        result: Bytes,
    ) -> Result<bool> {
        let node = self.paths.worker_node(app_id, container_id, iteration);
        let split = self.paths.worker_split_node(app_id, container_id, iteration);
        let was_split = self
            .payloads
            .write(node.as_str(), split.as_str(), result, CreateMode::Persistent)
            .await?;
        tracing::debug!(app_id, container_id, iteration, split = was_split, "published worker result");
        Ok(was_split)
    }

    pub async fn read_worker(
        &self,
        app_id: &str,
        container_id: &str,
        iteration: u32,
    ) -> Result<Option<Bytes>> {
        let node = self.paths.worker_node(app_id, container_id, iteration);
        let split = self.paths.worker_split_node(app_id, container_id, iteration);
        self.payloads.read(node.as_str(), split.as_str()).await
    }
}

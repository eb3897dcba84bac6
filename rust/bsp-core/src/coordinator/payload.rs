// rust/bsp-core/src/coordinator/payload.rs

//! Payload splitting and reassembly.
//!
//! A payload no larger than the node data limit is stored in its node
//! directly. A larger one is cut into `limit`-sized chunks stored as children
//! `0..n` of a separate split node, and the node itself is created without
//! data to mark the split. Reading a node with no data lists the split node,
//! fetches every chunk through the [`ChunkPool`] and concatenates them in
//! index order, whatever order the fetches complete in.
//!
//! Dropping a `write` or `read` future cancels chunk tasks that have not
//! started yet; running ones finish on their own.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;

use super::pool::{join_batch, ChunkPool};
use crate::config::PayloadConfig;
use crate::error::{CoordinationError, Result};
use crate::store::{CoordinationStore, CreateMode, StoreError};

/// Default per-node payload limit (1 MiB).
pub const DEFAULT_NODE_DATA_LIMIT: usize = 1024 * 1024;

/// Number of chunks a payload of `len` bytes is cut into.
pub fn chunk_count(len: usize, limit: usize) -> usize {
    len.div_ceil(limit.max(1))
}

/// Parses a split-node child name as a chunk index.
///
/// Only plain ASCII digits are accepted, so `+1` or ` 1` are rejected
/// rather than silently read as chunk 1.
pub fn parse_chunk_index(parent: &str, name: &str) -> Result<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoordinationError::malformed_child(parent, name));
    }
    name.parse()
        .map_err(|_| CoordinationError::malformed_child(parent, name))
}

/// Orders child names by numeric chunk index ("10" after "9").
fn sort_chunk_names(parent: &str, names: Vec<String>) -> Result<Vec<(u64, String)>> {
    let mut indexed = names
        .into_iter()
        .map(|name| parse_chunk_index(parent, &name).map(|index| (index, name)))
        .collect::<Result<Vec<_>>>()?;
    indexed.sort_unstable_by_key(|(index, _)| *index);
    Ok(indexed)
}

/// Writes and reads payloads that may exceed the store's node limit.
#[derive(Clone)]
pub struct PayloadStore {
    store: Arc<dyn CoordinationStore>,
    pool: ChunkPool,
    limit: usize,
}

impl std::fmt::Debug for PayloadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadStore")
            .field("session_id", &self.store.session_id())
            .field("pool_size", &self.pool.size())
            .field("limit", &self.limit)
            .finish()
    }
}

impl PayloadStore {
    pub fn new(store: Arc<dyn CoordinationStore>, pool: ChunkPool, limit: usize) -> Self {
        Self {
            store,
            pool,
            limit: limit.max(1),
        }
    }

    pub fn from_config(
        store: Arc<dyn CoordinationStore>,
        pool: ChunkPool,
        config: &PayloadConfig,
    ) -> Self {
        Self::new(store, pool, config.node_data_limit)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Stores `payload` at `node`, splitting it under `split` when it is
    /// larger than the limit. Returns whether it was split.
    ///
    /// Creation is create-or-fail: an existing `node`, `split` or chunk is
    /// reported as a store error, never overwritten.
    ///
    /// # Errors
    ///
    /// Returns the first failing store call. When a chunk write fails, the
    /// remaining in-flight chunk writes are awaited before returning and
    /// `node` is left uncreated.
    pub async fn write(
        &self,
        node: &str,
        split: &str,
        payload: Bytes,
        mode: CreateMode,
    ) -> Result<bool> {
        if payload.len() <= self.limit {
            self.store
                .create(node, Some(payload), mode, true)
                .await
                .map_err(|e| CoordinationError::store("create", node, e))?;
            return Ok(false);
        }

        let chunks = chunk_count(payload.len(), self.limit);
        tracing::debug!(node, split, len = payload.len(), chunks, "splitting payload");

        self.store
            .create(split, None, CreateMode::Persistent, true)
            .await
            .map_err(|e| CoordinationError::store("create", split, e))?;

        let batch = CancellationToken::new();
        let _guard = batch.clone().drop_guard();

        let handles = (0..chunks)
            .map(|index| {
                let start = index * self.limit;
                let end = (start + self.limit).min(payload.len());
                let chunk = payload.slice(start..end);
                let store = self.store.clone();
                let path = format!("{split}/{index}");

                let handle = self.pool.spawn(&batch, async move {
                    let result = store.create(&path, Some(chunk), mode, false).await;
                    result.map_err(|e| CoordinationError::store("create", path, e))
                });
                (index, handle)
            })
            .collect();
        join_batch(&batch, handles).await?;

        self.store
            .create(node, None, mode, true)
            .await
            .map_err(|e| CoordinationError::store("create", node, e))?;
        Ok(true)
    }

    /// Reads the payload stored at `node`, reassembling it from `split` if
    /// the node carries no data.
    ///
    /// Returns `None` when the node has no data and the split node is absent
    /// or has no chunks.
    ///
    /// # Errors
    ///
    /// Fails with [`CoordinationError::MalformedChildName`] if a split child
    /// is not a chunk index, and with a store error if any fetch fails. No
    /// partial buffer is ever returned.
    pub async fn read(&self, node: &str, split: &str) -> Result<Option<Bytes>> {
        let data = self
            .store
            .get_data(node)
            .await
            .map_err(|e| CoordinationError::store("get_data", node, e))?;
        if let Some(data) = data {
            return Ok(Some(data));
        }

        let names = match self.store.get_children(split).await {
            Ok(names) => names,
            Err(StoreError::NoNode { .. }) => {
                tracing::debug!(node, split, "no data and no split node");
                return Ok(None);
            }
            Err(e) => return Err(CoordinationError::store("get_children", split, e)),
        };
        if names.is_empty() {
            return Ok(None);
        }

        let ordered = sort_chunk_names(split, names)?;
        tracing::debug!(node, split, chunks = ordered.len(), "reassembling payload");

        let batch = CancellationToken::new();
        let _guard = batch.clone().drop_guard();

        let handles = ordered
            .into_iter()
            .enumerate()
            .map(|(position, (_, name))| {
                let store = self.store.clone();
                let path = format!("{split}/{name}");

                let handle = self.pool.spawn(&batch, async move {
                    let result = store.get_data(&path).await;
                    result
                        .map(Option::unwrap_or_default)
                        .map_err(|e| CoordinationError::store("get_data", path, e))
                });
                (position, handle)
            })
            .collect();
        let mut chunks = join_batch(&batch, handles).await?;

        chunks.sort_unstable_by_key(|(position, _)| *position);
        let total = chunks.iter().map(|(_, chunk)| chunk.len()).sum();
        let mut buffer = BytesMut::with_capacity(total);
        for (_, chunk) in chunks {
            buffer.extend_from_slice(&chunk);
        }
        Ok(Some(buffer.freeze()))
    }
}

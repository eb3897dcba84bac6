// rust/bsp-core/src/coordinator/pool.rs

//! Bounded pool for chunk reads and writes.
//!
//! Tasks run on the tokio runtime but at most `size` of them do work at any
//! moment. Every task is tracked so shutdown can drain in-flight work for a
//! grace period before cancelling what is left.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{CoordinationError, Result};

/// Default number of concurrent chunk tasks.
pub const DEFAULT_POOL_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct ChunkPool {
    size: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for ChunkPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl ChunkPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Queues `task`. It starts once a slot frees up, unless `batch` or the
    /// pool is cancelled first. Once started, only pool shutdown stops it.
    pub fn spawn<F, T>(&self, batch: &CancellationToken, task: F) -> JoinHandle<Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let shutdown = self.shutdown.clone();
        let batch = batch.clone();

        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(CoordinationError::Cancelled),
                _ = batch.cancelled() => return Err(CoordinationError::Cancelled),
                permit = permits.acquire_owned() => {
                    permit.map_err(|_| CoordinationError::Cancelled)?
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => Err(CoordinationError::Cancelled),
                result = task => result,
            }
        })
    }

    /// Stops accepting work and waits up to `grace` for tracked tasks, then
    /// cancels the rest. Returns whether everything finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !drained {
            tracing::warn!(
                remaining = self.tracker.len(),
                "chunk tasks still running after {:?}, cancelling",
                grace
            );
        }
        self.shutdown.cancel();
        self.tracker.wait().await;
        drained
    }
}

/// Waits for every task of a batch, in completion order.
///
/// The first failure cancels `batch` so queued tasks never start, but tasks
/// already running are still awaited before that failure is returned.
pub(crate) async fn join_batch<T>(
    batch: &CancellationToken,
    handles: Vec<(usize, JoinHandle<Result<T>>)>,
) -> Result<Vec<(usize, T)>> {
    let mut pending: FuturesUnordered<_> = handles
        .into_iter()
        .map(|(index, handle)| async move { (index, handle.await) })
        .collect();

    let mut done = Vec::with_capacity(pending.len());
    let mut first_error: Option<CoordinationError> = None;

    while let Some((index, joined)) = pending.next().await {
        let outcome = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(CoordinationError::chunk_task(index, "task panicked")),
            Err(_) => Err(CoordinationError::chunk_task(index, "task aborted")),
        };
        match outcome {
            Ok(value) => done.push((index, value)),
            Err(e) => {
                if first_error.is_none() {
                    tracing::debug!(index, error = %e, "chunk task failed, cancelling batch");
                    batch.cancel();
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(done),
    }
}

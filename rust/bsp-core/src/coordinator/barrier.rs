// rust/bsp-core/src/coordinator/barrier.rs

//! Iteration barriers built on retry commands.
//!
//! The master waits for worker nodes of an iteration to reach a quorum;
//! workers wait for the master node of an iteration to appear. Both poll the
//! store with the configured backoff until satisfied or cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::paths::PathScheme;
use super::quorum::QuorumCriteria;
use super::retry::{RetryCommand, RetryPolicy};
use crate::error::{CoordinationError, Result};
use crate::store::{CoordinationStore, StoreError};

#[derive(Clone)]
pub struct IterationBarrier {
    store: Arc<dyn CoordinationStore>,
    paths: PathScheme,
    policy: RetryPolicy,
}

impl IterationBarrier {
    pub fn new(store: Arc<dyn CoordinationStore>, paths: PathScheme, policy: RetryPolicy) -> Self {
        Self {
            store,
            paths,
            policy,
        }
    }

    /// Number of workers that published a result for `iteration`.
    pub async fn completed_workers(&self, app_id: &str, iteration: u32) -> Result<usize> {
        let node = self.paths.worker_iteration_node(app_id, iteration);
        let listed = self.store.get_children(node.as_str()).await;
        match listed {
            Ok(children) => Ok(children.len()),
            Err(StoreError::NoNode { .. }) => Ok(0),
            Err(e) => Err(CoordinationError::store("get_children", node, e)),
        }
    }

    /// Waits until enough workers finished `iteration`, returning how many
    /// had finished when the barrier was released.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::Cancelled`] when `cancel` fires, a fatal session
    /// error as is, or [`CoordinationError::Command`] for any other store
    /// failure.
    pub async fn wait_for_workers(
        &self,
        app_id: &str,
        iteration: u32,
        criteria: QuorumCriteria,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let command = RetryCommand::new(self.policy);
        let completed = AtomicUsize::new(0);
        let (command_ref, completed_ref) = (&command, &completed);

        command
            .execute(cancel, move || async move {
                let done = self.completed_workers(app_id, iteration).await?;
                completed_ref.store(done, Ordering::Relaxed);
                Ok::<_, CoordinationError>(command_ref.is_terminated(
                    done,
                    criteria.total,
                    criteria.min_ratio,
                    criteria.timeout,
                ))
            })
            .await?;

        let done = completed.load(Ordering::Relaxed);
        tracing::info!(
            app_id,
            iteration,
            completed = done,
            total = criteria.total,
            attempts = command.attempts(),
            elapsed_ms = command.elapsed().as_millis() as u64,
            "worker barrier released"
        );
        Ok(done)
    }

    /// Waits until the master node of `iteration` exists.
    pub async fn wait_for_master(
        &self,
        app_id: &str,
        iteration: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let node = self.paths.master_node(app_id, iteration);
        let node = node.as_str();
        let command = RetryCommand::new(self.policy);

        command
            .execute(cancel, move || async move {
                self.store
                    .exists(node)
                    .await
                    .map_err(|e| CoordinationError::store("exists", node, e))
            })
            .await?;

        tracing::debug!(app_id, iteration, attempts = command.attempts(), "master result available");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CreateMode, MemoryStore};
    use std::time::Duration;

    const UNIT: Duration = Duration::from_millis(100);

    fn barrier() -> (MemoryStore, IterationBarrier) {
        let memory = MemoryStore::new();
        let barrier = IterationBarrier::new(
            Arc::new(memory.clone()),
            PathScheme::default(),
            RetryPolicy::fixed(UNIT),
        );
        (memory, barrier)
    }

    async fn finish_workers(memory: &MemoryStore, iteration: u32, containers: std::ops::Range<usize>) {
        for container in containers {
            let path = format!("/_bsp/app/workers/{iteration}/c{container}");
            memory.create(&path, None, CreateMode::Persistent, true).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_completed_workers_without_node() {
        let (_, barrier) = barrier();
        assert_eq!(barrier.completed_workers("app", 1).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cohort_releases_immediately() {
        let (memory, barrier) = barrier();
        finish_workers(&memory, 1, 0..4).await;

        let criteria = QuorumCriteria::new(4, 0.5, Duration::from_secs(60));
        let done = barrier
            .wait_for_workers("app", 1, criteria, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_quorum_after_timeout() {
        let (memory, barrier) = barrier();
        finish_workers(&memory, 2, 0..6).await;

        let criteria = QuorumCriteria::new(11, 0.5, Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        let done = barrier
            .wait_for_workers("app", 2, criteria, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(done, 6);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_for_stragglers_can_be_cancelled() {
        let (memory, barrier) = barrier();
        finish_workers(&memory, 1, 0..9).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });

        // ten workers always need everyone
        let criteria = QuorumCriteria::new(10, 0.1, Duration::from_secs(1));
        let result = barrier.wait_for_workers("app", 1, criteria, &cancel).await;
        assert!(matches!(result, Err(CoordinationError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_master() {
        let (memory, barrier) = barrier();
        let writer = memory.clone();
        tokio::spawn(async move {
            tokio::time::sleep(UNIT * 3).await;
            writer
                .create("/_bsp/app/master/5", None, CreateMode::Persistent, true)
                .await
                .unwrap();
        });

        barrier
            .wait_for_master("app", 5, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_ends_wait() {
        let (memory, barrier) = barrier();
        memory.expire_session();

        let result = barrier
            .wait_for_master("app", 1, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(CoordinationError::SessionExpired { .. })));
    }
}

//! Lifecycle of the deletion worker pool.
//!
//! This module defines [`DeletionPool`], which owns the task [`Queue`], a
//! fixed set of worker tasks, one aggregator task and the cancellation token
//! they all share. Handlers only ever see two operations:
//!
//! - [`DeletionPool::push`] - synchronous, never blocks, returns whether the
//!   task was accepted.
//! - [`DeletionPool::close`] - stops intake and waits for every worker and the
//!   aggregator to exit.
//!
//! The pool token is a child of the token passed to [`DeletionPool::new`], so
//! cancelling the parent (service abort) and a fatal storage error inside any
//! worker both stop all workers between tasks.

use super::{
    queue::Queue,
    task::Task,
    worker::{WorkerContext, worker_loop},
};
use crate::server::telemetry::{
    increment_links_deleted, increment_rejected_deletes, record_ids_per_task,
};
use linkshrink_core::{Error, Result, storage::Repository};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Sizing of a [`DeletionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers, fixed for the lifetime of the pool.
    pub num_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
        }
    }
}

/// A fail-fast pool of asynchronous workers applying soft deletions.
pub struct DeletionPool {
    queue: Arc<Queue>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<Result<()>>>>,
    aggregator: Mutex<Option<JoinHandle<u64>>>,
    deleted: Arc<AtomicU64>,
    num_workers: usize,
}

impl DeletionPool {
    /// Spawns `config.num_workers` workers (at least one) and the aggregator
    /// on the current Tokio runtime.
    ///
    /// Workers start immediately and park on the empty queue.
    pub fn new(
        storage: Arc<dyn Repository>,
        config: PoolConfig,
        parent: &CancellationToken,
    ) -> Self {
        let num_workers = config.num_workers.max(1);
        let queue = Arc::new(Queue::new());
        let cancel = parent.child_token();
        let deleted = Arc::new(AtomicU64::new(0));
        let (totals_tx, totals_rx) = mpsc::unbounded_channel();

        let workers = (0..num_workers)
            .map(|worker_id| {
                let ctx = WorkerContext {
                    queue: Arc::clone(&queue),
                    storage: Arc::clone(&storage),
                    cancel: cancel.clone(),
                    totals: totals_tx.clone(),
                };
                tokio::spawn(worker_loop(worker_id, ctx))
            })
            .collect();

        // Workers hold the only senders: the aggregator ends when they do.
        drop(totals_tx);
        let aggregator = tokio::spawn(aggregate(totals_rx, Arc::clone(&deleted)));

        tracing::info!("Deletion pool started with {num_workers} workers");

        Self {
            queue,
            cancel,
            workers: Mutex::new(workers),
            aggregator: Mutex::new(Some(aggregator)),
            deleted,
            num_workers,
        }
    }

    /// Queues `ids` for soft deletion on behalf of `user_id`.
    ///
    /// Returns `false` if the pool is closed, was cancelled or lost a worker
    /// to a storage failure. Acceptance says nothing about eventual success.
    pub fn push(&self, ids: Vec<String>, user_id: impl Into<String>) -> bool {
        let count = ids.len();
        let accepted =
            !self.cancel.is_cancelled() && self.queue.push(Task::new(ids, user_id));

        if accepted {
            record_ids_per_task(count as f64);
            tracing::debug!("Queued deletion task with {count} ids");
        } else {
            increment_rejected_deletes();
            tracing::warn!("Rejected deletion task with {count} ids: pool is closed");
        }
        accepted
    }

    /// Stops accepting tasks and waits for every worker and the aggregator to
    /// exit.
    ///
    /// Tasks a worker already picked up run to completion; tasks still queued
    /// are abandoned. Returns the storage error that stopped the pool, if
    /// any. Calling `close` again returns `Ok(())` right away.
    pub async fn close(&self) -> Result<()> {
        let abandoned = self.queue.close();
        if abandoned > 0 {
            tracing::warn!("Abandoning {abandoned} queued deletion tasks");
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        let mut failure: Option<Error> = None;

        for (worker_id, handle) in workers.into_iter().enumerate() {
            let err = match handle.await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(join_err) => {
                    tracing::error!("Worker {worker_id} did not exit cleanly: {join_err}");
                    Error::Internal {
                        context: format!("worker {worker_id}: {join_err}"),
                    }
                }
            };
            // Siblings of a failed worker may report the cancellation it
            // caused; keep the root cause.
            if failure.as_ref().is_none_or(|f| *f == Error::Cancelled) {
                failure = Some(err);
            }
        }

        let aggregator = self.aggregator.lock().take();
        if let Some(handle) = aggregator {
            if let Err(e) = handle.await {
                tracing::error!("Deletion aggregator did not exit cleanly: {e}");
            }
        }

        match failure {
            Some(e) => {
                tracing::error!("Deletion pool stopped after a storage failure: {e}");
                Err(e)
            }
            None => {
                tracing::info!("Deletion pool closed");
                Ok(())
            }
        }
    }

    /// Whether [`push`](Self::push) would currently accept a task.
    pub fn is_accepting(&self) -> bool {
        !self.cancel.is_cancelled() && !self.queue.is_stopped()
    }

    /// Total number of identifiers applied so far.
    pub fn deleted_total(&self) -> u64 {
        self.deleted.load(Ordering::Acquire)
    }

    /// Tasks waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }
}

impl Drop for DeletionPool {
    fn drop(&mut self) {
        // Unblock any worker still parked on the queue.
        self.queue.close();
    }
}

async fn aggregate(mut totals: mpsc::UnboundedReceiver<usize>, deleted: Arc<AtomicU64>) -> u64 {
    let mut total = 0_u64;
    while let Some(count) = totals.recv().await {
        total += count as u64;
        deleted.store(total, Ordering::Release);
        increment_links_deleted(count as u64);
        tracing::debug!("Soft-deleted {total} links so far");
    }
    tracing::info!("Total links soft-deleted: {total}");
    total
}

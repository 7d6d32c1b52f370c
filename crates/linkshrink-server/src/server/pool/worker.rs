use super::queue::Queue;
use crate::server::telemetry::increment_pool_failures;
use linkshrink_core::{Error, Result, storage::Repository};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything a worker shares with the rest of the pool.
pub struct WorkerContext {
    pub queue: Arc<Queue>,
    pub storage: Arc<dyn Repository>,
    pub cancel: CancellationToken,
    pub totals: mpsc::UnboundedSender<usize>,
}

/// Worker task responsible for applying queued deletion [`Task`]s.
///
/// The worker loops until the queue is closed, the shared cancellation token
/// fires or a storage call fails:
///
/// - On success, the number of identifiers in the task is sent to the pool's
///   aggregator.
/// - On failure, the shared token is cancelled so every sibling worker stops
///   too, and the storage error is returned.
/// - A storage call that reports [`Error::Cancelled`] ends the loop like any
///   other observed cancellation.
///
/// Whatever ends the loop, the queue is closed on the way out so producers
/// see the pool as unavailable.
///
/// [`Task`]: super::task::Task
pub async fn worker_loop(worker_id: usize, ctx: WorkerContext) -> Result<()> {
    tracing::trace!("Worker {worker_id} started");

    let result = drain(worker_id, &ctx).await;

    let abandoned = ctx.queue.close();
    if abandoned > 0 {
        tracing::warn!("Worker {worker_id} abandoned {abandoned} queued deletion tasks");
    }

    tracing::trace!("Worker {worker_id} stopped");
    result
}

async fn drain(worker_id: usize, ctx: &WorkerContext) -> Result<()> {
    loop {
        let task = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                tracing::debug!("Worker {worker_id} observed cancellation");
                return Ok(());
            }
            task = ctx.queue.pop_wait() => match task {
                Some(task) => task,
                None => return Ok(()),
            },
        };

        tracing::debug!(
            "Worker {worker_id} marking {} links of user {} as deleted",
            task.ids().len(),
            task.user_id()
        );

        match ctx
            .storage
            .bunch_mark_deleted(&ctx.cancel, task.ids(), task.user_id())
            .await
        {
            Ok(()) => {}
            // The token fired while the task was in flight: a sibling failed
            // or the pool was aborted. Not a failure of this worker.
            Err(Error::Cancelled) => {
                tracing::debug!("Worker {worker_id} dropped an in-flight task on cancellation");
                return Ok(());
            }
            Err(e) => {
                tracing::error!("Worker {worker_id} failed to apply deletion task: {e}");
                increment_pool_failures();
                ctx.cancel.cancel();
                return Err(e);
            }
        }

        // The aggregator only stops once every sender is gone, so this cannot
        // fail while the worker is alive.
        let _ = ctx.totals.send(task.ids().len());
    }
}

use super::{DeletionPool, PoolConfig};
use linkshrink_core::{
    Error, Result,
    storage::Repository,
    types::{BatchItem, BatchResult, Stats, UserLink},
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Records every deletion call. Optionally fails the n-th call or holds each
/// call until the test hands out a permit. Like the real backends, a call
/// made with a cancelled token fails with [`Error::Cancelled`].
#[derive(Default)]
struct RecordingStorage {
    calls: Mutex<Vec<(Vec<String>, String)>>,
    started: AtomicUsize,
    fail_on: Option<usize>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingStorage {
    fn failing_on(call: usize) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(Vec<String>, String)> {
        self.calls.lock().clone()
    }
}

#[tonic::async_trait]
impl Repository for RecordingStorage {
    async fn link_by_short(&self, _short: &str) -> Result<String> {
        unreachable!("pool never resolves links")
    }

    async fn save(&self, _user_id: &str, _origin: &str) -> Result<String> {
        unreachable!("pool never saves links")
    }

    async fn bunch_save(&self, _user_id: &str, _items: Vec<BatchItem>) -> Result<Vec<BatchResult>> {
        unreachable!("pool never saves links")
    }

    async fn links_by_user(&self, _user_id: &str) -> Result<Vec<UserLink>> {
        unreachable!("pool never lists links")
    }

    async fn bunch_mark_deleted(
        &self,
        cancel: &CancellationToken,
        ids: &[String],
        user_id: &str,
    ) -> Result<()> {
        let call = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().push((ids.to_vec(), user_id.to_owned()));

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.fail_on == Some(call) {
            return Err(Error::storage("disk full"));
        }
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        Ok(Stats::default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}

fn pool_with(storage: &Arc<RecordingStorage>, num_workers: usize) -> DeletionPool {
    DeletionPool::new(
        storage.clone(),
        PoolConfig { num_workers },
        &CancellationToken::new(),
    )
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn applies_a_single_task() {
    let storage = Arc::new(RecordingStorage::default());
    let pool = pool_with(&storage, 2);

    assert!(pool.push(ids(&["a", "b", "c"]), "u1"));
    wait_for("deleted total", || pool.deleted_total() == 3).await;
    pool.close().await.unwrap();

    assert_eq!(storage.calls(), vec![(ids(&["a", "b", "c"]), "u1".to_owned())]);
    assert_eq!(pool.deleted_total(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_are_each_applied_once() {
    let storage = Arc::new(RecordingStorage::default());
    let pool = Arc::new(pool_with(&storage, 4));

    let producers: Vec<_> = (0..10)
        .map(|producer| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                for n in 0..5 {
                    assert!(pool.push(vec![format!("{producer}-{n}")], format!("u{producer}")));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    wait_for("all tasks", || pool.deleted_total() == 50).await;
    pool.close().await.unwrap();

    let calls = storage.calls();
    assert_eq!(calls.len(), 50);
    let unique: HashSet<_> = calls.iter().map(|(ids, _)| ids[0].clone()).collect();
    assert_eq!(unique.len(), 50);
}

#[tokio::test]
async fn single_worker_preserves_push_order() {
    let storage = Arc::new(RecordingStorage::default());
    let pool = pool_with(&storage, 1);

    for id in ["a", "b", "c", "d", "e"] {
        assert!(pool.push(ids(&[id]), "u1"));
    }
    wait_for("five calls", || storage.calls().len() == 5).await;
    pool.close().await.unwrap();

    let order: Vec<_> = storage.calls().into_iter().map(|(ids, _)| ids[0].clone()).collect();
    assert_eq!(order, ids(&["a", "b", "c", "d", "e"]));
}

#[tokio::test]
async fn push_after_close_is_rejected() {
    let storage = Arc::new(RecordingStorage::default());
    let pool = pool_with(&storage, 2);

    pool.close().await.unwrap();

    assert!(!pool.is_accepting());
    assert!(!pool.push(ids(&["a"]), "u1"));
    assert!(storage.calls().is_empty());
}

#[tokio::test]
async fn close_finishes_in_flight_task_and_abandons_queued_ones() {
    let gate = Arc::new(Semaphore::new(0));
    let storage = Arc::new(RecordingStorage::gated(Arc::clone(&gate)));
    let pool = Arc::new(pool_with(&storage, 1));

    assert!(pool.push(ids(&["a", "b"]), "u1"));
    wait_for("worker to pick up the first task", || {
        storage.started.load(Ordering::SeqCst) == 1
    })
    .await;
    assert!(pool.push(ids(&["c"]), "u1"));
    assert_eq!(pool.pending(), 1);

    let closing = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.close().await }
    });
    wait_for("intake to stop", || !pool.is_accepting()).await;
    assert!(!pool.push(ids(&["d"]), "u1"));

    gate.add_permits(1);
    closing.await.unwrap().unwrap();

    assert_eq!(storage.calls(), vec![(ids(&["a", "b"]), "u1".to_owned())]);
    assert_eq!(pool.deleted_total(), 2);
    assert_eq!(pool.pending(), 0);
}

#[tokio::test]
async fn storage_failure_stops_the_pool() {
    let storage = Arc::new(RecordingStorage::failing_on(1));
    let pool = pool_with(&storage, 2);

    assert!(pool.push(ids(&["a"]), "u1"));
    wait_for("pool to stop after the failure", || !pool.is_accepting()).await;

    assert!(!pool.push(ids(&["b"]), "u1"));
    assert_eq!(pool.close().await, Err(Error::storage("disk full")));
    assert_eq!(storage.calls().len(), 1);
    assert_eq!(pool.deleted_total(), 0);
}

#[tokio::test]
async fn storage_failure_stops_queued_work_on_every_worker() {
    let storage = Arc::new(RecordingStorage::failing_on(3));
    let pool = pool_with(&storage, 4);

    for n in 0..40 {
        assert!(pool.push(vec![format!("id-{n}")], "u1"));
    }
    wait_for("pool to stop after the failure", || !pool.is_accepting()).await;

    assert_eq!(pool.close().await, Err(Error::storage("disk full")));
    assert_eq!(storage.calls().len(), 3);
    assert_eq!(pool.deleted_total(), 2);
    assert_eq!(pool.pending(), 0);
}

#[tokio::test]
async fn sibling_cancelled_mid_call_keeps_the_root_cause() {
    let gate = Arc::new(Semaphore::new(0));
    let storage = Arc::new(RecordingStorage {
        fail_on: Some(1),
        ..RecordingStorage::gated(Arc::clone(&gate))
    });
    let pool = pool_with(&storage, 2);

    assert!(pool.push(ids(&["a"]), "u1"));
    assert!(pool.push(ids(&["b"]), "u1"));
    wait_for("both workers to be in flight", || {
        storage.started.load(Ordering::SeqCst) == 2
    })
    .await;

    // The first call fails and cancels the pool; the second then sees the
    // cancelled token.
    gate.add_permits(2);

    assert_eq!(pool.close().await, Err(Error::storage("disk full")));
    assert_eq!(storage.calls().len(), 2);
    assert_eq!(pool.deleted_total(), 0);
}

#[tokio::test]
async fn parent_cancellation_during_a_call_is_a_clean_stop() {
    let gate = Arc::new(Semaphore::new(0));
    let storage = Arc::new(RecordingStorage::gated(Arc::clone(&gate)));
    let parent = CancellationToken::new();
    let pool = DeletionPool::new(storage.clone(), PoolConfig { num_workers: 1 }, &parent);

    assert!(pool.push(ids(&["a"]), "u1"));
    wait_for("worker to pick up the task", || {
        storage.started.load(Ordering::SeqCst) == 1
    })
    .await;

    parent.cancel();
    gate.add_permits(1);

    pool.close().await.unwrap();
    assert_eq!(pool.deleted_total(), 0);
}

#[tokio::test]
async fn parent_cancellation_stops_the_pool() {
    let storage = Arc::new(RecordingStorage::default());
    let parent = CancellationToken::new();
    let pool = DeletionPool::new(storage.clone(), PoolConfig { num_workers: 3 }, &parent);
    assert_eq!(pool.num_workers(), 3);

    parent.cancel();

    assert!(!pool.is_accepting());
    assert!(!pool.push(ids(&["a"]), "u1"));
    pool.close().await.unwrap();
    assert!(storage.calls().is_empty());
}

#[tokio::test]
async fn close_is_idempotent() {
    let storage = Arc::new(RecordingStorage::default());
    let pool = pool_with(&storage, 0);
    assert_eq!(pool.num_workers(), 1);

    pool.close().await.unwrap();
    pool.close().await.unwrap();
}

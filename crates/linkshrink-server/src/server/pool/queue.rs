//! Blocking FIFO shared by request handlers (producers) and workers
//! (consumers).
//!
//! The queue is a monitor: a [`parking_lot::Mutex`] guards the items and the
//! `stopped` flag, and a [`Notify`] plays the role of the condition variable.
//! [`Queue::push`] wakes one waiting worker, [`Queue::close`] wakes all of
//! them.

use super::task::Task;
use parking_lot::Mutex;
use std::{collections::VecDeque, pin::pin};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Task>,
    stopped: bool,
}

/// Unbounded multi-producer, multi-consumer task queue with a terminal closed
/// state.
#[derive(Debug, Default)]
pub struct Queue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `task` and wakes a single waiting consumer.
    ///
    /// Returns `false`, dropping the task, if the queue is closed. The check
    /// and the append happen under the same lock, so no task can slip in
    /// after [`close`](Self::close).
    pub fn push(&self, task: Task) -> bool {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.items.push_back(task);
        }
        self.available.notify_one();
        true
    }

    /// Waits for the next task in FIFO order.
    ///
    /// Returns `None` once the queue is closed; tasks still queued at that
    /// point are never handed out.
    pub async fn pop_wait(&self) -> Option<Task> {
        loop {
            // Register for wake-ups before inspecting the state so that a push
            // or close landing in between is not missed.
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.stopped {
                    return None;
                }
                if let Some(task) = state.items.pop_front() {
                    return Some(task);
                }
            }

            notified.await;
        }
    }

    /// Closes the queue and wakes every waiting consumer.
    ///
    /// Returns the number of queued tasks that were abandoned. Only the first
    /// call has any effect; later calls return `0`.
    pub fn close(&self) -> usize {
        let abandoned = {
            let mut state = self.state.lock();
            if state.stopped {
                return 0;
            }
            state.stopped = true;
            std::mem::take(&mut state.items)
        };
        self.available.notify_waiters();
        abandoned.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};
    use tokio::time::timeout;

    fn task(id: &str) -> Task {
        Task::new(vec![id.to_owned()], "u1")
    }

    #[tokio::test]
    async fn pops_in_push_order() {
        let queue = Queue::new();
        for id in ["a", "b", "c"] {
            assert!(queue.push(task(id)));
        }
        assert_eq!(queue.len(), 3);

        for id in ["a", "b", "c"] {
            assert_eq!(queue.pop_wait().await.unwrap().ids(), [id.to_owned()]);
        }
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn push_wakes_a_waiting_consumer() {
        let queue = Arc::new(Queue::new());
        let consumer = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.pop_wait().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.push(task("late")));

        let popped = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer was not woken")
            .unwrap();
        assert_eq!(popped, Some(task("late")));
    }

    #[tokio::test]
    async fn close_wakes_every_waiting_consumer() {
        let queue = Arc::new(Queue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.pop_wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.close(), 0);

        for consumer in consumers {
            let popped = timeout(Duration::from_secs(1), consumer)
                .await
                .expect("consumer was not woken by close")
                .unwrap();
            assert_eq!(popped, None);
        }
    }

    #[tokio::test]
    async fn close_abandons_pending_tasks_and_rejects_pushes() {
        let queue = Queue::new();
        queue.push(task("a"));
        queue.push(task("b"));

        assert_eq!(queue.close(), 2);
        assert!(queue.is_stopped());
        assert_eq!(queue.close(), 0);

        assert!(!queue.push(task("c")));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.pop_wait().await, None);
    }

    #[tokio::test]
    async fn each_task_is_delivered_once() {
        let queue = Arc::new(Queue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(task) = queue.pop_wait().await {
                        seen.push(task.ids()[0].clone());
                    }
                    seen
                })
            })
            .collect();

        for i in 0..200 {
            assert!(queue.push(task(&i.to_string())));
        }
        while queue.len() > 0 {
            tokio::task::yield_now().await;
        }
        queue.close();

        let mut seen = Vec::new();
        for consumer in consumers {
            seen.extend(consumer.await.unwrap());
        }
        seen.sort_by_key(|id| id.parse::<u32>().unwrap());
        let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }
}

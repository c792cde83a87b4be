use std::sync::Arc;

use thiserror::Error;
use tokio::{
    sync::{AcquireError, Semaphore},
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Cancelled")]
    Cancelled,
    #[error(transparent)]
    Closed(#[from] AcquireError),
}

impl crate::Cancellable for SubmitError {
    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A bounded set of spawned tasks.
///
/// [`TaskPool::submit`] waits for a free slot before spawning, so at most
/// `capacity` submitted tasks run at once. [`TaskPool::join_all`] is the
/// completion barrier.
#[derive(Debug)]
pub struct TaskPool<T> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<T>,
    cancel: CancellationToken,
    capacity: usize,
}

impl<T: Send + 'static> TaskPool<T> {
    #[must_use]
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        let capacity = capacity.max(1);

        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            tasks: JoinSet::new(),
            cancel,
            capacity,
        }
    }

    /// Number of tasks currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Number of spawned tasks not yet joined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for a free slot and spawns `task` in it.
    ///
    /// # Errors
    ///
    /// * If the pool's cancellation token fires before a slot frees up
    pub async fn submit<F>(&mut self, task: F) -> Result<(), SubmitError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(SubmitError::Cancelled);
        }

        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(SubmitError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => permit?,
        };

        self.tasks.spawn(async move {
            let output = task.await;
            drop(permit);
            output
        });

        Ok(())
    }

    /// Waits for every spawned task, in completion order.
    pub async fn join_all(mut self) -> Vec<Result<T, JoinError>> {
        let mut results = Vec::with_capacity(self.tasks.len());

        while let Some(result) = self.tasks.join_next().await {
            results.push(result);
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn never_exceeds_capacity() {
        let mut pool = TaskPool::new(2, CancellationToken::new());
        let current = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let current = current.clone();
            let max = max.clone();
            pool.submit(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                i
            })
            .await
            .unwrap();
        }

        let mut results = pool
            .join_all()
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect::<Vec<_>>();
        results.sort_unstable();

        assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(max.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn cancelled_pool_rejects_new_work_but_joins_started_work() {
        let cancel = CancellationToken::new();
        let mut pool = TaskPool::new(1, cancel.clone());

        pool.submit(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            1
        })
        .await
        .unwrap();

        cancel.cancel();

        assert!(matches!(
            pool.submit(async { 2 }).await,
            Err(SubmitError::Cancelled)
        ));

        let results = pool.join_all().await;

        assert_eq!(results.len(), 1);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn waiting_submit_is_released_by_cancellation() {
        let cancel = CancellationToken::new();
        let mut pool = TaskPool::new(1, cancel.clone());

        pool.submit(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await
        .unwrap();
        assert_eq!(pool.in_flight(), 1);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        assert!(matches!(
            pool.submit(async {}).await,
            Err(SubmitError::Cancelled)
        ));
        assert_eq!(pool.len(), 1);
    }
}

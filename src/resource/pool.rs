//! Listing worker pool
//!
//! Runs listing calls on the tokio runtime with a fixed number of them in
//! flight at once, handing back a [`ListingHandle`] the caller awaits later.

use crate::error::{CloudError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Default number of concurrent listing workers
pub const DEFAULT_WORKERS: usize = 10;

/// Fixed-size pool owned by the services that create it
#[derive(Debug, Clone)]
pub struct ListingPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl ListingPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Schedule a listing; it waits for a free worker before starting.
    pub fn submit<T, Fut>(&self, listing: Fut) -> ListingHandle<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let task = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| CloudError::Internal(format!("Listing pool closed: {}", e)))?;
            listing.await
        });
        ListingHandle { task }
    }
}

impl Default for ListingPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

/// Pending result of a submitted listing.
///
/// Dropping the handle detaches the listing; the request in flight is not
/// interrupted.
#[derive(Debug)]
pub struct ListingHandle<T> {
    task: JoinHandle<Result<T>>,
}

impl<T> ListingHandle<T> {
    /// Wait for the listing to finish
    pub async fn join(self) -> Result<T> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(CloudError::Internal(format!("Listing worker failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_submit_returns_result() {
        let pool = ListingPool::new(2);
        let handle = pool.submit(async { Ok(vec![1, 2, 3]) });
        assert_eq!(handle.join().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_errors_propagate_through_handle() {
        let pool = ListingPool::default();
        let handle: ListingHandle<Vec<u8>> =
            pool.submit(async { Err(CloudError::Communication("down".into())) });
        assert!(matches!(handle.join().await, Err(CloudError::Communication(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_limits_concurrency() {
        let pool = ListingPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                })
            })
            .collect();

        let results = futures::future::join_all(handles.into_iter().map(ListingHandle::join)).await;
        let mut values: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        values.sort();

        assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        assert_eq!(ListingPool::new(0).workers(), 1);
    }
}

//! Bounded worker pool: caps how many check plugins run concurrently.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::invocation::{CheckInvocation, CheckOutcome};

/// A pool of `size` permits; `submit` blocks the caller only long enough
/// to acquire one, then runs the check on a fresh task (§4.1,
/// "Concurrency: the runner exposes a bounded worker pool with
/// configurable size").
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Spawns the invocation on a tokio task once a permit is free,
    /// returning a handle the caller can await for the outcome.
    pub fn submit(&self, invocation: CheckInvocation) -> JoinHandle<CheckOutcome> {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("worker pool semaphore is never closed");
            crate::invocation::run(&invocation).await
        })
    }

    /// Number of permits currently free.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pool_bounds_concurrency() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.available_permits(), 2);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                pool.submit(CheckInvocation::new(
                    vec!["/bin/sleep".to_string(), "0".to_string()],
                    Duration::from_secs(5),
                ))
            })
            .collect();

        for handle in handles {
            let outcome = handle.await.expect("task panicked");
            assert_eq!(outcome.exit_status, 0);
        }
    }
}

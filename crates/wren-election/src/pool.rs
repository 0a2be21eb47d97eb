//! Bounded worker pool for election rounds.
//!
//! Submission never blocks: a batch either claims a slot and is spawned, or
//! is rejected with `PoolSaturated`. Backpressure lives at the enqueue
//! boundary (the bounded request queue), not here.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{ElectionError, Result};

pub(crate) struct ElectionPool {
    size: usize,
    running: Arc<AtomicUsize>,
}

impl ElectionPool {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of rounds currently running.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Claim a slot and spawn the round. Fails fast when every slot is taken.
    pub fn submit<F>(&self, round: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let claimed = self
            .running
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| {
                (running < self.size).then_some(running + 1)
            });
        if claimed.is_err() {
            return Err(ElectionError::PoolSaturated {
                running: self.size,
                size: self.size,
            });
        }

        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            round.await;
            running.fetch_sub(1, Ordering::AcqRel);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_pool_tracks_running_rounds() {
        let pool = ElectionPool::new(2);
        assert_eq!(pool.running(), 0);

        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.submit(async move {
            let _ = release_rx.await;
        })
        .unwrap();

        // Spawned task has claimed its slot synchronously.
        assert_eq!(pool.running(), 1);

        release_tx.send(()).unwrap();
        for _ in 0..50 {
            if pool.running() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test]
    async fn test_pool_rejects_when_full() {
        let pool = ElectionPool::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.submit(async move {
            let _ = release_rx.await;
        })
        .unwrap();

        let rejected = pool.submit(async {});
        assert!(matches!(
            rejected,
            Err(ElectionError::PoolSaturated { .. })
        ));
        let _ = release_tx.send(());
    }
}

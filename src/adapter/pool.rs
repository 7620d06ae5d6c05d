//! Per-router, per-protocol connection limiting.
//!
//! Native and REST adapters hold real sockets and should not be opened unboundedly;
//! SNMP is stateless (each call is its own UDP round trip) and has no pool at all.
//! A semaphore permit is cheap to acquire/release compared to the connection it
//! guards, so this is plain `tokio::sync::Semaphore` rather than a hand-rolled pool.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Bounds concurrent in-flight calls through one adapter instance.
#[derive(Clone)]
pub struct AdapterPool {
    semaphore: Arc<Semaphore>,
}

impl AdapterPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Waits for a free slot. The returned permit releases the slot on drop.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("adapter pool semaphore is never closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limits_concurrency_to_configured_max() {
        let pool = AdapterPool::new(2);
        let p1 = pool.acquire().await;
        let p2 = pool.acquire().await;
        assert_eq!(pool.semaphore.available_permits(), 0);
        drop(p1);
        assert_eq!(pool.semaphore.available_permits(), 1);
        drop(p2);
    }
}

//! Bounded-concurrency gate for engine dispatches.
//!
//! A counting semaphore with FIFO fairness among waiters. Constructed once
//! per [`Runner`](crate::Runner) instance and shared by reference with the
//! dispatch tasks it gates, never process-wide. Permits are owned values
//! released on drop, so a dispatch cannot leak a permit on any exit path.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// FIFO counting semaphore with a fixed capacity.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// An outstanding unit of allowed concurrency. Returned to the gate on drop,
/// waking the longest-waiting acquirer.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate allowing at most `capacity` concurrent holders.
    /// Capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Suspend until a permit is available.
    ///
    /// tokio's semaphore queues waiters in FIFO order, so no acquirer
    /// starves as long as every holder eventually drops its permit.
    pub async fn acquire(&self) -> GatePermit {
        // acquire_owned only fails if the semaphore is closed; we never
        // close it, so the gate upholds "acquire eventually succeeds".
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore never closed");
        GatePermit { _permit: permit }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held. Equals `capacity()` when idle.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_are_returned_on_drop() {
        let gate = ConcurrencyGate::new(2);
        assert_eq!(gate.available_permits(), 2);

        let a = gate.acquire().await;
        let b = gate.acquire().await;
        assert_eq!(gate.available_permits(), 0);

        drop(a);
        assert_eq!(gate.available_permits(), 1);
        drop(b);
        assert_eq!(gate.available_permits(), 2);
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped_to_one() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.capacity(), 1);
        let permit = gate.acquire().await;
        assert_eq!(gate.available_permits(), 0);
        drop(permit);
        assert_eq!(gate.available_permits(), 1);
    }

    #[tokio::test]
    async fn waiter_resumes_when_holder_releases() {
        let gate = ConcurrencyGate::new(1);
        let permit = gate.acquire().await;

        let gate2 = gate.clone();
        let waiter = tokio::spawn(async move {
            let _p = gate2.acquire().await;
        });

        // Give the waiter a chance to queue, then release.
        tokio::task::yield_now().await;
        drop(permit);
        waiter.await.unwrap();
        assert_eq!(gate.available_permits(), 1);
    }
}

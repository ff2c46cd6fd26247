//! Bounded-concurrency gate.
//!
//! A counting semaphore with a fixed capacity that caps how many task bodies
//! execute at once. It is separate from the queue's own
//! `max_concurrency`: the queue limits how many tasks are dispatched into
//! `Running`, the gate limits how many of those actually hold a permit.
//!
//! Permits are values. Releasing one consumes it, so the counter can never
//! climb above the capacity and a task can never give back a permit twice.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::GateError;

/// Admission-control primitive shared between tasks.
///
/// Cloning a gate yields another handle to the same counter.
#[derive(Debug, Clone)]
pub struct Gate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Gate {
    /// Create a gate that admits at most `capacity` holders at once.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.get())),
            capacity: capacity.get(),
        }
    }

    /// Maximum number of simultaneous permit holders.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait until a permit is free and take it.
    ///
    /// Waiters are served in FIFO order. Fails only once the gate is closed.
    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed)?;
        Ok(GatePermit { _permit: permit })
    }

    /// Take a permit if one is free right now.
    pub fn try_acquire(&self) -> Result<Option<GatePermit>, GateError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Some(GatePermit { _permit: permit })),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(GateError::Closed),
        }
    }

    /// Close the gate. Pending and future `acquire` calls fail with
    /// [`GateError::Closed`]; permits already handed out stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`Gate::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// A held slot in a [`Gate`]. Dropping it frees the slot.
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Give the slot back to the gate.
    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn gate(capacity: usize) -> Gate {
        Gate::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[tokio::test]
    async fn acquire_and_release_balance() {
        let gate = gate(2);
        assert_eq!(gate.capacity(), 2);
        assert_eq!(gate.available(), 2);

        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
        assert_eq!(gate.in_use(), 2);

        a.release();
        assert_eq!(gate.available(), 1);
        drop(b);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn try_acquire_reports_exhaustion() {
        let gate = gate(1);
        let held = gate.try_acquire().unwrap();
        assert!(held.is_some());
        assert!(gate.try_acquire().unwrap().is_none());
        drop(held);
        assert!(gate.try_acquire().unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let gate = gate(1);
        let held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        held.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be admitted after release")
            .unwrap()
            .unwrap();
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let gate = gate(1);
        let _held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        gate.close();
        assert!(gate.is_closed());
        let result = waiter.await.unwrap();
        assert_eq!(result, Err(GateError::Closed));
        assert_eq!(gate.try_acquire().unwrap_err(), GateError::Closed);
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let gate = gate(3);
        let permits = futures::future::join_all((0..3).map(|_| gate.acquire()))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(gate.available(), 0);
        drop(permits);
        assert_eq!(gate.available(), gate.capacity());
    }
}

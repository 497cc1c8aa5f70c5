//! Bounded worker pool for backend executions

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ChartsmithError, Result};

/// Caps concurrent executions; excess callers wait in a bounded queue
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
    max_concurrent: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize, queue_capacity: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            waiting: AtomicUsize::new(0),
            max_concurrent,
            queue_capacity,
        }
    }

    /// Take an execution slot, waiting if none is free
    ///
    /// Fails with `Overloaded` instead of waiting once `queue_capacity` callers are queued.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if let Ok(permit) = self.permits.clone().try_acquire_owned() {
            return Ok(permit);
        }

        let queued = QueueSlot::enter(&self.waiting);
        if queued.position >= self.queue_capacity {
            log::warn!(
                "Worker pool saturated: {} running, {} waiting",
                self.max_concurrent,
                queued.position
            );
            return Err(ChartsmithError::Overloaded(queued.position));
        }

        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ChartsmithError::InvalidState("worker pool closed".to_string()))
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Free execution slots right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Callers currently queued for a slot
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Counts a caller as queued until dropped
struct QueueSlot<'a> {
    counter: &'a AtomicUsize,
    position: usize,
}

impl<'a> QueueSlot<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let position = counter.fetch_add(1, Ordering::SeqCst);
        Self { counter, position }
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

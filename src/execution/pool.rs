//! Bounded worker pool for flow executions

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Occupancy snapshot of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub active_workers: usize,
    pub max_workers: usize,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub available_capacity: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("worker pool saturated ({max_workers} workers, {queue_capacity} queued)")]
pub struct PoolSaturated {
    pub max_workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug)]
struct PoolInner {
    max_workers: usize,
    queue_capacity: usize,
    workers: Arc<Semaphore>,
    /// Running plus queued tasks
    occupied: AtomicUsize,
    active: AtomicUsize,
}

/// Fixed number of workers plus a bounded wait queue.
///
/// A task is either running (holding a worker permit) or queued waiting for
/// one. Submissions beyond `max_workers + queue_capacity` are refused.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct OccupiedSlot(Arc<PoolInner>);

impl Drop for OccupiedSlot {
    fn drop(&mut self) {
        self.0.occupied.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ActiveWorker(Arc<PoolInner>);

impl ActiveWorker {
    fn enter(inner: Arc<PoolInner>) -> Self {
        inner.active.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(max_workers: usize, queue_capacity: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(PoolInner {
                max_workers,
                queue_capacity,
                workers: Arc::new(Semaphore::new(max_workers)),
                occupied: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Run `task` on the pool, or refuse it if workers and queue are full
    pub fn submit<F>(&self, task: F) -> Result<JoinHandle<F::Output>, PoolSaturated>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let limit = self.inner.max_workers + self.inner.queue_capacity;
        self.inner
            .occupied
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |occupied| {
                (occupied < limit).then_some(occupied + 1)
            })
            .map_err(|_| PoolSaturated {
                max_workers: self.inner.max_workers,
                queue_capacity: self.inner.queue_capacity,
            })?;

        let slot = OccupiedSlot(self.inner.clone());
        let inner = self.inner.clone();
        Ok(tokio::spawn(async move {
            let _slot = slot;
            // the semaphore is never closed
            let _permit = inner.workers.clone().acquire_owned().await.ok();
            let _active = ActiveWorker::enter(inner);
            task.await
        }))
    }

    pub fn status(&self) -> PoolStatus {
        let occupied = self.inner.occupied.load(Ordering::SeqCst);
        let active = self.inner.active.load(Ordering::SeqCst).min(occupied);
        let limit = self.inner.max_workers + self.inner.queue_capacity;
        PoolStatus {
            active_workers: active,
            max_workers: self.inner.max_workers,
            queue_size: occupied - active,
            queue_capacity: self.inner.queue_capacity,
            available_capacity: limit.saturating_sub(occupied),
        }
    }

    /// Free slots: idle workers plus remaining queue space
    pub fn available_capacity(&self) -> usize {
        self.status().available_capacity
    }
}

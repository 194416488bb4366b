//! A fixed set of pre-built pipeline instances.
//!
//! Callers block until an instance is idle. An acquired instance goes back
//! to the pool when its [`PooledPipeline`] handle is dropped, including when
//! the caller's future is cancelled.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

type IdleQueue<T> = Arc<Mutex<VecDeque<Arc<T>>>>;

pub struct PipelinePool<T> {
    idle: IdleQueue<T>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl<T> PipelinePool<T> {
    pub fn new(instances: Vec<T>) -> Self {
        let capacity = instances.len();
        let idle: VecDeque<Arc<T>> = instances.into_iter().map(Arc::new).collect();
        Self {
            idle: Arc::new(Mutex::new(idle)),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for an idle instance.
    pub async fn acquire(&self) -> RuntimeResult<PooledPipeline<T>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RuntimeError::PoolClosed)?;
        self.take(permit)
    }

    /// Wait for an idle instance or for `cancel` to fire.
    pub async fn acquire_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> RuntimeResult<PooledPipeline<T>> {
        tokio::select! {
            _ = cancel.cancelled() => Err(RuntimeError::Cancelled),
            pipeline = self.acquire() => pipeline,
        }
    }

    /// Wake all waiters with [`RuntimeError::PoolClosed`].
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    fn take(&self, permit: OwnedSemaphorePermit) -> RuntimeResult<PooledPipeline<T>> {
        let instance = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or(RuntimeError::PoolClosed)?;
        debug!(idle = self.permits.available_permits(), "pipeline acquired");
        Ok(PooledPipeline {
            instance,
            idle: self.idle.clone(),
            _permit: permit,
        })
    }
}

/// An instance checked out of a [`PipelinePool`].
pub struct PooledPipeline<T> {
    instance: Arc<T>,
    idle: IdleQueue<T>,
    // Released after the instance is back in the idle queue.
    _permit: OwnedSemaphorePermit,
}

impl<T> Deref for PooledPipeline<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.instance
    }
}

impl<T> Drop for PooledPipeline<T> {
    fn drop(&mut self) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(self.instance.clone());
    }
}

//! Blocking, closeable priority queue of pending pods.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use polaris_collections::HeapMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::QueuedPodInfo;
use crate::plugin::SortPlugin;

struct QueueState {
    heap: HeapMap<String, QueuedPodInfo>,
    closed: bool,
}

/// Orders pods with a [`SortPlugin`] and hands them out one at a time.
///
/// Enqueueing a pod whose key (`<namespace>.<name>`) is already queued
/// replaces the queued entry.
pub struct PrioritySchedulingQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PrioritySchedulingQueue {
    pub fn new(sort: Arc<dyn SortPlugin>) -> Self {
        let heap = HeapMap::new(move |a: &QueuedPodInfo, b: &QueuedPodInfo| sort.less(a, b));
        Self {
            state: Mutex::new(QueueState {
                heap,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Add or replace a pod. No-op once the queue is closed.
    pub fn enqueue(&self, pod: QueuedPodInfo) {
        let mut state = self.lock();
        if state.closed {
            debug!(pod = %pod.key(), "scheduling queue closed, dropping pod");
            return;
        }
        state.heap.add_or_replace(pod.key(), pod);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the highest-priority pod. Returns `None` once the queue is
    /// closed.
    pub async fn dequeue(&self) -> Option<QueuedPodInfo> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (popped, more) = {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                let popped = state.heap.pop();
                (popped, !state.heap.is_empty())
            };

            if let Some((_, pod)) = popped {
                if more {
                    // Pass the wakeup on so other idle dequeuers see the rest.
                    self.notify.notify_one();
                }
                return Some(pod);
            }

            notified.await;
        }
    }

    /// Like [`dequeue`](Self::dequeue), but also returns `None` when
    /// `cancel` fires.
    pub async fn dequeue_cancellable(&self, cancel: &CancellationToken) -> Option<QueuedPodInfo> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            pod = self.dequeue() => pod,
        }
    }

    /// Close the queue and wake every waiting dequeuer.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.heap.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

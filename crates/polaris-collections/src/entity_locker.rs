//! Named, on-demand mutual exclusion.
//!
//! `EntityLocker::lock(name)` grants exclusive ownership of `name` without
//! any prior registration. The first caller for a name acquires the lock
//! immediately; later callers wait in FIFO order until the holder drops
//! (or explicitly unlocks) its [`EntityLock`], which hands the lock to the
//! next waiter. Once the last holder or waiter is gone, the registry entry
//! for the name is deleted, so long-tail names never accumulate.
//!
//! Registry bookkeeping (waiter count, creation, deletion) happens under a
//! single registry mutex. An acquirer therefore either joins the live entry
//! or creates a fresh one; it can never join an entry that is already
//! being deleted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct LockEntry {
    /// Holder plus waiters. The entry is deleted when this drops to zero.
    queued: usize,
    mutex: Arc<AsyncMutex<()>>,
}

type Registry = Arc<Mutex<HashMap<String, LockEntry>>>;

/// Hands out per-name locks.
#[derive(Clone, Default)]
pub struct EntityLocker {
    registry: Registry,
}

impl EntityLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `name`, waiting until all earlier callers for
    /// the same name have released it.
    ///
    /// Dropping the returned future before it completes gives up the
    /// caller's place in the queue.
    pub async fn lock(&self, name: &str) -> EntityLock {
        let (mutex, ticket) = self.enqueue(name);
        let guard = mutex.lock_owned().await;
        trace!(entity = %name, "entity lock acquired");
        EntityLock {
            _guard: guard,
            ticket,
        }
    }

    /// Like [`lock`](Self::lock), but returns `None` as soon as `cancel`
    /// fires.
    pub async fn lock_cancellable(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Option<EntityLock> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            lock = self.lock(name) => Some(lock),
        }
    }

    /// Number of names that currently have a holder or waiters.
    pub fn active_locks(&self) -> usize {
        lock_registry(&self.registry).len()
    }

    fn enqueue(&self, name: &str) -> (Arc<AsyncMutex<()>>, Ticket) {
        let mut registry = lock_registry(&self.registry);
        let entry = registry
            .entry(name.to_string())
            .or_insert_with(|| LockEntry {
                queued: 0,
                mutex: Arc::new(AsyncMutex::new(())),
            });
        entry.queued += 1;
        let ticket = Ticket {
            registry: self.registry.clone(),
            name: name.to_string(),
        };
        (entry.mutex.clone(), ticket)
    }
}

/// Ownership of a single entity name. Released on drop.
pub struct EntityLock {
    // Field order matters: the guard is released before the ticket
    // decrements the waiter count.
    _guard: OwnedMutexGuard<()>,
    ticket: Ticket,
}

impl EntityLock {
    /// The entity covered by this lock.
    pub fn name(&self) -> &str {
        &self.ticket.name
    }

    /// Release the lock and wake the next waiter, if any.
    pub fn unlock(self) {}
}

impl std::fmt::Debug for EntityLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityLock")
            .field("name", &self.ticket.name)
            .finish()
    }
}

/// A place in the queue for a name. Dropping it removes the caller from
/// the waiter count and deletes the registry entry once nobody is left.
struct Ticket {
    registry: Registry,
    name: String,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut registry = lock_registry(&self.registry);
        if let Some(entry) = registry.get_mut(&self.name) {
            entry.queued -= 1;
            if entry.queued == 0 {
                registry.remove(&self.name);
                trace!(entity = %self.name, "entity lock deleted");
            }
        }
    }
}

fn lock_registry(registry: &Registry) -> std::sync::MutexGuard<'_, HashMap<String, LockEntry>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_locker_acquires_immediately() {
        let locker = EntityLocker::new();
        let lock = tokio::time::timeout(Duration::from_millis(100), locker.lock("node-1"))
            .await
            .expect("uncontended lock must not block");
        assert_eq!(lock.name(), "node-1");
        assert_eq!(locker.active_locks(), 1);

        lock.unlock();
        assert_eq!(locker.active_locks(), 0);
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let locker = EntityLocker::new();
        let _a = locker.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locker.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locker.active_locks(), 2);
    }

    #[tokio::test]
    async fn waiters_are_granted_in_call_order() {
        let locker = EntityLocker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locker.lock("x").await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let locker = locker.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let lock = locker.lock("x").await;
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(2)).await;
                drop(lock);
            }));
            // Let each waiter enqueue before spawning the next one.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(order.lock().unwrap().is_empty());
        drop(first);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(locker.active_locks(), 0);
    }

    #[tokio::test]
    async fn holders_never_overlap() {
        let locker = EntityLocker::new();
        let inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let locker = locker.clone();
                let inside = inside.clone();
                tokio::spawn(async move {
                    let _lock = locker.lock("shared").await;
                    let before = inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    assert_eq!(before, 0);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(locker.active_locks(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_its_slot() {
        let locker = EntityLocker::new();
        let holder = locker.lock("node").await;

        let cancel = CancellationToken::new();
        let waiter = {
            let locker = locker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { locker.lock_cancellable("node", &cancel).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(!waiter.await.unwrap());

        drop(holder);
        assert_eq!(locker.active_locks(), 0);

        // The name is usable again right away.
        let relock = tokio::time::timeout(Duration::from_millis(100), locker.lock("node")).await;
        assert!(relock.is_ok());
    }

    #[tokio::test]
    async fn lock_is_recreated_after_deletion() {
        let locker = EntityLocker::new();
        for _ in 0..3 {
            let lock = locker.lock("node").await;
            assert_eq!(locker.active_locks(), 1);
            drop(lock);
            assert_eq!(locker.active_locks(), 0);
        }
    }
}

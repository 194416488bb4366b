//! polaris-collections: concurrency primitives shared by the scheduler
//! and the cluster agent.
//!
//! - [`HeapMap`]: a binary heap whose entries are also addressable by key
//! - [`ConcurrentObjectStore`]: a read/write-locked, batch-access store over
//!   a `HeapMap`, used as the node cache
//! - [`EntityLocker`]: named mutual exclusion created on demand and dropped
//!   once nobody waits for it anymore
//!
//! # Architecture
//!
//! ```text
//! ConcurrentObjectStore<V>
//!   └── RwLock
//!       └── HeapMap<String, V> (ordered by key)
//!           ├── Vec<entry>        (heap order, O(1) index access)
//!           └── HashMap<key, slot> (O(1) key access)
//!
//! EntityLocker
//!   └── Mutex<HashMap<name, (waiters, async mutex)>>
//! ```

pub mod entity_locker;
pub mod heap_map;
pub mod object_store;

pub use entity_locker::{EntityLock, EntityLocker};
pub use heap_map::HeapMap;
pub use object_store::{ConcurrentObjectStore, StoreReader, StoreWriter};

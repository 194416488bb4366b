//! Per-pod state shared between pipeline stages.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

/// Opaque state stored by a plugin.
pub type StateData = Arc<dyn Any + Send + Sync>;

/// A thread-safe key/value bag scoped to one pod's traversal of the
/// pipelines, plus the cancellation token of the operation that created it.
///
/// Cloning yields a handle to the same state.
#[derive(Clone, Default)]
pub struct SchedulingContext {
    state: Arc<RwLock<HashMap<String, StateData>>>,
    cancel: CancellationToken,
}

impl SchedulingContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            state: Arc::default(),
            cancel,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Read the value stored under `key`, if it exists and has type `T`.
    pub fn read<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let data = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()?;
        data.downcast::<T>().ok()
    }

    pub fn write<T: Any + Send + Sync>(&self, key: impl Into<String>, data: T) {
        self.write_arc(key, Arc::new(data));
    }

    pub fn write_arc<T: Any + Send + Sync>(&self, key: impl Into<String>, data: Arc<T>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), data);
    }
}

impl fmt::Debug for SchedulingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("SchedulingContext")
            .field("keys", &keys)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

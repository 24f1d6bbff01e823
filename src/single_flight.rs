//! Async single-flight initializer.
//!
//! Concurrent first callers share one in-flight load; once a value is cached
//! every later caller reads it without touching the gate.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Lazily computed value whose load runs at most once at a time.
#[derive(Debug)]
pub struct SingleFlight<T> {
    value: RwLock<Option<Arc<T>>>,
    gate: Mutex<()>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
            gate: Mutex::new(()),
        }
    }

    /// Cached value, if a load has completed.
    pub async fn get(&self) -> Option<Arc<T>> {
        self.value.read().await.clone()
    }

    /// Return the cached value or run `init` to produce it.
    ///
    /// Errors are returned to the caller that ran the load and are not
    /// cached; the next caller starts a fresh load.
    pub async fn get_or_try_init<E, F, Fut>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get().await {
            return Ok(value);
        }

        let _guard = self.gate.lock().await;
        // Another caller may have finished the load while we waited.
        if let Some(value) = self.get().await {
            return Ok(value);
        }

        let loaded = Arc::new(init().await?);
        *self.value.write().await = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Drop the cached value so the next call reloads.
    pub async fn invalidate(&self) {
        let _guard = self.gate.lock().await;
        *self.value.write().await = None;
    }
}

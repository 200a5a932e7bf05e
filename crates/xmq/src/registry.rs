use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::Closeable;
use crate::error::{Error, Result};

/// Cache of live broker handles keyed by a derived name.
///
/// Handles are created lazily on first use. Creation is serialized so that
/// concurrent first calls for a key build exactly one broker session.
pub struct InstanceRegistry<H>
where
    H: Closeable,
{
    instances: RwLock<HashMap<String, Arc<H>>>,
    creation: Mutex<()>,
}

impl<H> Default for InstanceRegistry<H>
where
    H: Closeable,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<H> InstanceRegistry<H>
where
    H: Closeable,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
        }
    }

    /// Returns the handle cached under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<H>> {
        self.instances.read().get(key).cloned()
    }

    /// Returns the handle cached under `key`, building it with `factory` on a miss.
    ///
    /// # Errors
    /// Returns a construction error if the factory fails; nothing is cached.
    pub async fn get_or_create<F, Fut, E>(&self, key: &str, factory: F) -> Result<Arc<H>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<H, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }

        let _creation = self.creation.lock().await;

        if let Some(handle) = self.get(key) {
            return Ok(handle);
        }

        let handle = Arc::new(factory().await.map_err(|e| Error::Construction {
            name: key.to_string(),
            source: e.into(),
        })?);

        self.instances
            .write()
            .insert(key.to_string(), handle.clone());
        debug!(key, "created broker instance");

        Ok(handle)
    }

    /// Number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// Whether the registry holds no handles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    /// Closes and removes every cached handle.
    ///
    /// Close failures are logged and do not stop the remaining closes.
    pub async fn close_all(&self) {
        let _creation = self.creation.lock().await;
        let drained: Vec<(String, Arc<H>)> = self.instances.write().drain().collect();

        for (key, handle) in drained {
            if let Err(e) = handle.close().await {
                warn!(key = %key, error = %e, "failed to close broker instance");
            } else {
                debug!(key = %key, "closed broker instance");
            }
        }
    }
}

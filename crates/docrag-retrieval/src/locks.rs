use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-document async mutexes serialising ingest and removal of the same id.
/// Unrelated documents never wait on each other.
#[derive(Clone, Default)]
pub struct DocumentLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(map.entry(document_id.to_string()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Number of ids currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

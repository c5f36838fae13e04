use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-upload async mutexes. Holding the guard serializes every engine
/// operation on that upload id.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop entries nobody holds or waits on. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

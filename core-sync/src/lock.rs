//! In-process advisory locks keyed by sync config.
//!
//! Two runs of the same config in this process wait for each other instead
//! of interleaving their reads and writes against the destination playlist.
//! Other processes are not covered.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::sync_config::SyncConfigId;

#[derive(Clone, Default)]
pub struct ConfigLocks {
    locks: Arc<Mutex<HashMap<SyncConfigId, Arc<Mutex<()>>>>>,
}

impl ConfigLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder has `config_id`, then hold it until the
    /// returned guard is dropped.
    ///
    /// Entries that nobody holds or waits on are removed here, so the map
    /// only tracks configs with a live run.
    pub async fn acquire(&self, config_id: SyncConfigId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(config_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_config_is_exclusive() {
        let locks = ConfigLocks::new();
        let config_id = SyncConfigId::new();

        let guard = locks.acquire(config_id).await;
        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire(config_id)).await;
        assert!(waiting.is_err(), "second holder should wait");

        drop(guard);
        let _second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(config_id))
            .await
            .expect("lock should be free after drop");
    }

    #[tokio::test]
    async fn test_different_configs_do_not_block() {
        let locks = ConfigLocks::new();
        let _a = locks.acquire(SyncConfigId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(SyncConfigId::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_locks_are_dropped() {
        let locks = ConfigLocks::new();
        for _ in 0..10 {
            let _guard = locks.acquire(SyncConfigId::new()).await;
        }

        let held = locks.acquire(SyncConfigId::new()).await;
        assert_eq!(locks.locks.lock().await.len(), 1);

        drop(held);
        let _next = locks.acquire(SyncConfigId::new()).await;
        assert_eq!(locks.locks.lock().await.len(), 1);
    }
}

use super::LeaseLock;
use tokio::runtime::Handle;
use tracing::debug;

/// Scoped ownership of one acquired lock
///
/// Prefer [`release`](Self::release), which waits for the row to be deleted.
/// Dropping the guard instead removes the id from the process registry at
/// once and deletes the row on a background task. With no tokio runtime
/// around, the row is left to expire.
#[derive(Debug)]
#[must_use = "dropping the guard releases the lock"]
pub struct LeaseGuard {
    lock: LeaseLock,
    id: String,
    armed: bool,
}

impl LeaseGuard {
    pub(crate) fn new(lock: LeaseLock, id: String) -> Self {
        Self {
            lock,
            id,
            armed: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True while the local registry still lists this id
    pub fn is_held(&self) -> bool {
        self.lock.is_held(&self.id)
    }

    /// Release and wait for the store delete
    pub async fn release(mut self) {
        self.armed = false;
        self.lock.release(&self.id).await;
    }

    /// Keep the lock beyond this scope
    ///
    /// The id stays in the manager's registry, so `release`, `release_all`
    /// or `shutdown` on the manager still free it.
    pub fn leak(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.id)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.lock.forget(&self.id);

        let Ok(runtime) = Handle::try_current() else {
            debug!(id = %self.id, "No runtime to release dropped lock, leaving row to expire");
            return;
        };
        let lock = self.lock.clone();
        let id = std::mem::take(&mut self.id);
        runtime.spawn(async move {
            // Reacquired meanwhile, the row now belongs to the new holder
            if lock.is_held(&id) {
                return;
            }
            lock.delete_row(&id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::config::LockConfig;
    use crate::lease::LeaseLock;
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_release() {
        let store = MemoryStore::new();
        let lock = LeaseLock::new(Arc::new(store.clone()), LockConfig::default());

        let guard = lock.try_lock("job").await.unwrap();
        assert_eq!(guard.id(), "job");
        assert!(guard.is_held());
        assert!(lock.try_lock("job").await.is_some_and(|again| {
            // Re-entrant: a second guard for the same id, leaked so it does
            // not release underneath the first one
            again.leak() == "job"
        }));

        guard.release().await;
        assert!(!lock.is_held("job"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_guard_drop_releases_in_background() {
        let store = MemoryStore::new();
        let lock = LeaseLock::new(Arc::new(store.clone()), LockConfig::default());

        {
            let _guard = lock.lock("scoped").await.unwrap();
            assert!(store.get("scoped").is_some());
        }
        assert!(!lock.is_held("scoped"));

        for _ in 0..100 {
            if store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_leaked_guard_flushed_by_shutdown() {
        let store = MemoryStore::new();
        let lock = LeaseLock::new(Arc::new(store.clone()), LockConfig::default());

        let id = lock.try_lock("kept").await.unwrap().leak();
        assert_eq!(id, "kept");
        assert!(lock.is_held("kept"));

        assert_eq!(lock.shutdown().await, 1);
        assert!(store.is_empty());
    }
}

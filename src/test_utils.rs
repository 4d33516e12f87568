use crate::{
    config::LockConfig,
    error::StoreError,
    lease::{LeaseLock, LockRow, RowFilter},
    storage::{LeaseStore, MemoryStore, StoreResult},
    time::Clock,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Build `n` independent managers ("processes") sharing one in-memory table
pub fn shared_processes(
    n: usize,
    config: LockConfig,
    clock: Arc<dyn Clock>,
) -> (MemoryStore, Vec<LeaseLock>) {
    let store = MemoryStore::new();
    let procs = (0..n)
        .map(|_| LeaseLock::with_clock(Arc::new(store.clone()), config.clone(), clock.clone()))
        .collect();
    (store, procs)
}

/// A [`MemoryStore`] wrapper that fails on demand and counts inserts
#[derive(Debug, Default)]
pub struct FlakyStore {
    memory: MemoryStore,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
    insert_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaseStore for FlakyStore {
    async fn insert(&self, row: LockRow) -> StoreResult<()> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected insert failure".into()));
        }
        self.memory.insert(row).await
    }

    async fn delete_where(&self, filter: RowFilter) -> StoreResult<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected delete failure".into()));
        }
        self.memory.delete_where(filter).await
    }

    async fn rows(&self) -> StoreResult<Vec<LockRow>> {
        self.memory.rows().await
    }
}

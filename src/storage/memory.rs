use super::{LeaseStore, StoreResult};
use crate::error::StoreError;
use crate::lease::{LockRow, RowFilter};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Process-local lock table
///
/// Clones share the same map, so several managers built over clones of one
/// `MemoryStore` behave like separate processes sharing a database table.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Arc<DashMap<String, LockRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<LockRow> {
        self.rows.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn insert(&self, row: LockRow) -> StoreResult<()> {
        match self.rows.entry(row.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate { id: row.id }),
            Entry::Vacant(slot) => {
                slot.insert(row);
                Ok(())
            }
        }
    }

    async fn delete_where(&self, filter: RowFilter) -> StoreResult<u64> {
        match filter {
            RowFilter::Id(id) => Ok(u64::from(self.rows.remove(&id).is_some())),
            filter => {
                let before = self.rows.len();
                self.rows.retain(|_, row| !filter.matches(row));
                Ok((before.saturating_sub(self.rows.len())) as u64)
            }
        }
    }

    async fn rows(&self) -> StoreResult<Vec<LockRow>> {
        Ok(self.rows.iter().map(|entry| entry.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_rejects_duplicate() {
        let store = MemoryStore::new();
        store.insert(LockRow::new("a", 10)).await.unwrap();

        let err = store.insert(LockRow::new("a", 20)).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(store.get("a").unwrap().expiry, 10);
    }

    #[tokio::test]
    async fn test_delete_expired_leaves_live_rows() {
        let store = MemoryStore::new();
        store.insert(LockRow::new("old", 10)).await.unwrap();
        store.insert(LockRow::new("edge", 20)).await.unwrap();
        store.insert(LockRow::new("live", 30)).await.unwrap();

        let removed = store.delete_where(RowFilter::ExpiredAt(20)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("live").is_some());
    }

    #[tokio::test]
    async fn test_clones_share_rows() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.insert(LockRow::new("shared", 10)).await.unwrap();

        assert!(other.insert(LockRow::new("shared", 10)).await.is_err());
        assert!(other.remove("shared").await.unwrap());
        assert!(!store.remove("shared").await.unwrap());
        assert!(store.is_empty());
    }
}

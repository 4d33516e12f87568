// Backing stores for the shared lock table
//
// The lock needs nothing more than insert-if-absent and delete-by-predicate.
// Mutual exclusion holds only if `insert` rejects an id that is already present.

use crate::error::StoreError;
use crate::lease::{LockRow, RowFilter};
use async_trait::async_trait;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait LeaseStore: Send + Sync + std::fmt::Debug {
    /// Insert a new row, failing with [`StoreError::Duplicate`] when the id exists
    async fn insert(&self, row: LockRow) -> StoreResult<()>;

    /// Delete every row matching `filter`, returning how many went away
    async fn delete_where(&self, filter: RowFilter) -> StoreResult<u64>;

    /// Keyed delete of a single row
    async fn remove(&self, id: &str) -> StoreResult<bool> {
        Ok(self.delete_where(RowFilter::Id(id.to_string())).await? > 0)
    }

    /// Snapshot of the whole table, live and expired rows alike
    async fn rows(&self) -> StoreResult<Vec<LockRow>>;
}

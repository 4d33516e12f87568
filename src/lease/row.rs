// Persisted lock rows and the predicates used to delete them

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One row of the shared lock table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockRow {
    /// Lock name, unique across the table
    pub id: String,

    /// Absolute expiry in milliseconds since the Unix epoch
    pub expiry: u64,
}

impl LockRow {
    pub fn new(id: impl Into<String>, expiry: u64) -> Self {
        Self {
            id: id.into(),
            expiry,
        }
    }

    /// A row stops guarding its id once `now` reaches the expiry
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry <= now
    }

    /// Time remaining until expiration
    pub fn time_remaining(&self, now: u64) -> Option<Duration> {
        if self.is_expired(now) {
            None
        } else {
            Some(Duration::from_millis(self.expiry - now))
        }
    }
}

/// Row selector for `delete_where`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    /// The row with exactly this id
    Id(String),
    /// Every row whose expiry is at or before this instant
    ExpiredAt(u64),
}

impl RowFilter {
    pub fn matches(&self, row: &LockRow) -> bool {
        match self {
            RowFilter::Id(id) => &row.id == id,
            RowFilter::ExpiredAt(now) => row.is_expired(*now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let row = LockRow::new("job-1", 50);
        assert!(!row.is_expired(49));
        assert!(row.is_expired(50));
        assert_eq!(row.time_remaining(10), Some(Duration::from_millis(40)));
        assert_eq!(row.time_remaining(50), None);
    }

    #[test]
    fn test_filter_matching() {
        let row = LockRow::new("a", 100);
        assert!(RowFilter::Id("a".into()).matches(&row));
        assert!(!RowFilter::Id("b".into()).matches(&row));
        assert!(RowFilter::ExpiredAt(100).matches(&row));
        assert!(!RowFilter::ExpiredAt(99).matches(&row));
    }
}

use thiserror::Error;

/// Failures reported by a [`LeaseStore`](crate::storage::LeaseStore).
///
/// These never reach callers of the lock operations; the lock manager turns
/// them into a `false` acquisition or swallows them on release.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Lock row {id:?} already exists")]
    Duplicate { id: String },

    #[error("SQL error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Store(StoreError::Sqlx(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Advisory distributed locks built on a shared table of `(id, expiry)` rows.
//!
//! A [`LeaseLock`] needs only insert-if-absent and delete-by-predicate from
//! its [`LeaseStore`]. Every acquisition attempt first purges expired rows,
//! so a crashed holder's lock frees itself once its lease runs out.

pub mod cli;
pub mod config;
pub mod error;
pub mod lease;
pub mod storage;
pub mod time;

pub mod test_utils;

pub use config::LockConfig;
pub use error::{Error, Result, StoreError};
pub use lease::{AcquireOptions, LeaseGuard, LeaseLock, LockRow, RowFilter};
pub use storage::{LeaseStore, MemoryStore, SqliteStore};

// Advisory lease locks over a shared (id, expiry) table
//
// - Single insert-if-absent per attempt, after purging expired rows
// - Fixed-interval polling for blocking acquisition, interruptible
// - Process-local registry of held ids, flushed on shutdown
// - Scoped guards that release on drop

pub mod guard;
pub mod lock;
pub mod row;

pub use guard::LeaseGuard;
pub use lock::{AcquireOptions, HeldLease, LeaseLock};
pub use row::{LockRow, RowFilter};

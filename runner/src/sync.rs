pub mod locking;

pub use locking::{BatchLock, LockError};

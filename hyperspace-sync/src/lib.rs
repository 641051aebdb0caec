//! Concurrent building blocks for the HyperSpace TUN driver.
//!
//! The packet engine couples a single-threaded reactor to any number of
//! application threads. These primitives carry that coupling:
//!
//! - [`Semaphore`]: counting semaphore on a mutex and condition variable
//! - [`BlockingDeque`]: bounded blocking FIFO with a head re-insert used to
//!   retry writes that hit EAGAIN
//! - [`ConcurrentList`]: reader-writer protected ordered sequence
//! - [`ShardedMap`]: hash map split into independently locked shards
//!
//! The containers follow a snapshot discipline: iteration copies the backing
//! storage under a shared lock and walks the copy outside it, so a reader
//! callback may call back into the container without deadlocking.
//!
//! Lock poisoning is absorbed everywhere; a guard abandoned by a panicking
//! thread is recovered and reused as-is.

mod deque;
mod list;
mod map;
mod semaphore;

pub use deque::BlockingDeque;
pub use list::ConcurrentList;
pub use map::ShardedMap;
pub use semaphore::Semaphore;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

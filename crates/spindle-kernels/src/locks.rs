//! Striped lock substrate for shared output rows
//!
//! Concurrent traversals serialize writes to the same output row through a
//! fixed pool of mutexes selected by hashing the row index. A hash
//! collision costs contention, never correctness. Each lock is padded to a
//! cache line so neighboring stripes do not false-share.
//!
//! The pool is process-wide and lazily initialized on first use, matching
//! the lifecycle of the output rows it protects (any TTMc call may touch
//! any row).

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};
use std::sync::OnceLock;

/// Number of stripes in the process-wide row-lock pool.
pub const NLOCKS: usize = 1024;

/// A fixed-capacity pool of cache-padded locks addressed by key hash.
pub struct LockStripes {
    stripes: Vec<CachePadded<Mutex<()>>>,
}

impl LockStripes {
    /// Create a pool with `capacity` stripes.
    pub fn new(capacity: usize) -> Self {
        Self {
            stripes: (0..capacity)
                .map(|_| CachePadded::new(Mutex::new(())))
                .collect(),
        }
    }

    /// Acquire the stripe guarding `key`. The guard releases on drop, so
    /// the critical section is exactly the guard's scope.
    #[inline]
    pub fn lock(&self, key: usize) -> MutexGuard<'_, ()> {
        self.stripes[key % self.stripes.len()].lock()
    }

    /// Number of stripes.
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Whether the pool has no stripes.
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }
}

/// The process-wide row-lock pool.
pub fn row_locks() -> &'static LockStripes {
    static ROW_LOCKS: OnceLock<LockStripes> = OnceLock::new();
    ROW_LOCKS.get_or_init(|| LockStripes::new(NLOCKS))
}

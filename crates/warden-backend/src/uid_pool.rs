//! The per-host pool of container uids.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use warden_common::error::{Result, WardenError};

const POOL_NAME: &str = "uid";

/// Hands out uids from `[start, start + size)`, lowest first.
#[derive(Debug)]
pub struct UidPool {
    start: u32,
    size: u32,
    free: Mutex<BTreeSet<u32>>,
}

impl UidPool {
    /// Creates a pool with every uid in range free.
    ///
    /// A range running past `u32::MAX` is truncated there.
    #[must_use]
    pub fn new(start: u32, size: u32) -> Self {
        let size = size.min(u32::MAX - start);
        Self {
            start,
            size,
            free: Mutex::new((start..start + size).collect()),
        }
    }

    /// Returns the number of uids the pool was created with.
    #[must_use]
    pub const fn initial_size(&self) -> u32 {
        self.size
    }

    /// Takes the lowest free uid.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::PoolExhausted`] if every uid is taken.
    pub fn acquire(&self) -> Result<u32> {
        let uid = self
            .lock()
            .pop_first()
            .ok_or(WardenError::PoolExhausted { pool: POOL_NAME })?;
        tracing::debug!(uid, "acquired uid");
        Ok(uid)
    }

    /// Returns `uid` to the pool. Uids outside the range are ignored.
    pub fn release(&self, uid: u32) {
        if !self.contains(uid) {
            tracing::debug!(uid, "ignoring release of foreign uid");
            return;
        }
        let _ = self.lock().insert(uid);
    }

    /// Takes a specific uid, e.g. one recorded by a container being
    /// restored. Uids outside the range are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::ResourceTaken`] if `uid` is not free.
    pub fn remove(&self, uid: u32) -> Result<()> {
        if !self.contains(uid) {
            return Ok(());
        }
        if self.lock().remove(&uid) {
            Ok(())
        } else {
            Err(WardenError::ResourceTaken {
                pool: POOL_NAME,
                value: uid,
            })
        }
    }

    const fn contains(&self, uid: u32) -> bool {
        uid >= self.start && uid - self.start < self.size
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u32>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn acquires_every_uid_in_range_then_exhausts() {
        let pool = UidPool::new(10_000, 5);
        let uids: HashSet<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(uids, (10_000..10_005).collect());
        assert!(matches!(
            pool.acquire(),
            Err(WardenError::PoolExhausted { pool: "uid" })
        ));
    }

    #[test]
    fn acquires_lowest_free_first() {
        let pool = UidPool::new(100, 3);
        assert_eq!(pool.acquire().unwrap(), 100);
        assert_eq!(pool.acquire().unwrap(), 101);
        pool.release(100);
        assert_eq!(pool.acquire().unwrap(), 100);
    }

    #[test]
    fn released_uid_can_be_acquired_again() {
        let pool = UidPool::new(100, 1);
        let uid = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());
        pool.release(uid);
        assert_eq!(pool.acquire().unwrap(), uid);
    }

    #[test]
    fn releasing_foreign_uid_is_ignored() {
        let pool = UidPool::new(100, 1);
        let _ = pool.acquire().unwrap();
        pool.release(99);
        pool.release(101);
        assert!(pool.acquire().is_err());
    }

    #[test]
    fn remove_takes_a_specific_uid() {
        let pool = UidPool::new(100, 3);
        pool.remove(100).unwrap();
        assert_eq!(pool.acquire().unwrap(), 101);
    }

    #[test]
    fn removing_taken_uid_fails() {
        let pool = UidPool::new(100, 3);
        let uid = pool.acquire().unwrap();
        assert!(matches!(
            pool.remove(uid),
            Err(WardenError::ResourceTaken { value: 100, .. })
        ));
    }

    #[test]
    fn removing_foreign_uid_is_ignored() {
        let pool = UidPool::new(100, 3);
        pool.remove(5).unwrap();
        assert_eq!(pool.acquire().unwrap(), 100);
    }

    #[test]
    fn reports_initial_size() {
        assert_eq!(UidPool::new(100, 42).initial_size(), 42);
        assert_eq!(UidPool::new(u32::MAX - 2, 10).initial_size(), 2);
    }

    #[test]
    fn concurrent_acquires_are_distinct() {
        let pool = Arc::new(UidPool::new(0, 64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || (0..8).map(|_| pool.acquire().unwrap()).collect::<Vec<_>>())
            })
            .collect();
        let all: HashSet<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), 64);
        assert!(pool.acquire().is_err());
    }
}

//! Lock-free LIFO of recycled region references.
//!
//! Dying threads push the reference of their zeroed region; newborn
//! threads pop one before asking the allocator for fresh memory. The
//! structure is a fixed array of atomic references plus an atomic count.
//! Invariant: once the count is `k`, slots `[0, k)` each hold a valid
//! non-zero reference or are transiently zero in the middle of a
//! push/pop.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::persist::Reference;

/// Capacity of the recycle list. A full list drops returns, which leaks
/// the region inside the persistent segment until process end.
pub(crate) const MAX_THREADS: usize = 100;

/// Bounded lock-free stack of region references.
pub(crate) struct AvailableRegions {
    references: [AtomicU32; MAX_THREADS],
    count: AtomicU32,
}

impl AvailableRegions {
    pub(crate) const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: AtomicU32 = AtomicU32::new(0);
        Self {
            references: [EMPTY; MAX_THREADS],
            count: AtomicU32::new(0),
        }
    }

    /// Number of references currently available.
    pub(crate) fn len(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Pushes a reference, returning false if the list is full and the
    /// reference was dropped.
    pub(crate) fn push(&self, reference: Reference) -> bool {
        debug_assert_ne!(reference, 0);
        loop {
            let count = self.count.load(Ordering::Acquire);
            if count as usize >= MAX_THREADS {
                return false;
            }

            // Claim the slot above the current top. Zero marks an empty
            // slot, so a racing pusher targeting the same index loses
            // the exchange and retries.
            if self.references[count as usize]
                .compare_exchange(0, reference, Ordering::Release, Ordering::Relaxed)
                .is_err()
            {
                std::thread::yield_now();
                continue;
            }

            // Publish the slot by incrementing the count. A concurrent
            // pop may have decremented it; undo the slot and start over.
            if self
                .count
                .compare_exchange(count, count + 1, Ordering::Release, Ordering::Relaxed)
                .is_err()
            {
                self.references[count as usize].store(0, Ordering::Relaxed);
                continue;
            }
            return true;
        }
    }

    /// Pops the most recently pushed reference, if any.
    pub(crate) fn pop(&self) -> Option<Reference> {
        let mut count = self.count.load(Ordering::Acquire);
        while count > 0 {
            let index = (count - 1) as usize;

            // Take the slot value eagerly; a zero means another taker
            // has it but has not decremented the count yet.
            let reference = self.references[index].swap(0, Ordering::Relaxed);
            if reference == 0 {
                std::thread::yield_now();
                count = self.count.load(Ordering::Acquire);
                continue;
            }

            match self.count.compare_exchange(
                count,
                count - 1,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(reference),
                Err(actual) => {
                    // A pusher got in first; restore the slot and retry
                    // from the new top.
                    self.references[index].store(reference, Ordering::Relaxed);
                    count = actual;
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for AvailableRegions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailableRegions")
            .field("count", &self.len())
            .finish_non_exhaustive()
    }
}

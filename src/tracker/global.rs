//! The process-wide tracker manager.
//!
//! Exactly one [`GlobalTracker`] may exist at a time. It owns the
//! persistent allocator, hands a region to every thread on first touch
//! (through thread-local storage), and recycles regions as threads exit.
//! The singleton pointer is installed once and read with an atomic load;
//! tearing it down requires quiescence of all per-thread trackers.

use std::alloc::Layout;
use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crate::activity::{ActivityData, ActivityKind};
use crate::error::TrackerError;
use crate::metrics::TrackerMetrics;
use crate::persist::{PersistentAllocator, Reference, Segment};
use crate::tracker::available::AvailableRegions;
use crate::tracker::thread::{ActivitySnapshot, ThreadActivityTracker, MIN_STACK_DEPTH};

/// Allocator type tag of a live per-thread region.
pub const TYPE_ID_TRACKER: u32 = 0x4CB8_B1E1;
/// Allocator type tag of a recycled region; external readers skip these.
pub const TYPE_ID_TRACKER_FREE: u32 = 0x3F32_A94B;

/// The installed singleton, or null. Non-null values originate from
/// `Arc::into_raw` and stay live until a quiescent destroy.
static GLOBAL: AtomicPtr<GlobalTracker> = AtomicPtr::new(std::ptr::null_mut());

thread_local! {
    /// This thread's managed tracker; dropped (and its region returned)
    /// by the TLS destructor on thread exit.
    static THIS_THREAD_TRACKER: RefCell<Option<ManagedTracker>> = const { RefCell::new(None) };
}

/// Process-wide manager of per-thread activity trackers.
///
/// Create one with [`create_with_file`], [`create_with_local_memory`],
/// or [`create_with_allocator`]; access it with [`get`]. Worker threads
/// normally never touch this type directly — the scoped wrappers in
/// [`crate::tracker::scoped`] find their thread's tracker through it.
///
/// [`create_with_file`]: GlobalTracker::create_with_file
/// [`create_with_local_memory`]: GlobalTracker::create_with_local_memory
/// [`create_with_allocator`]: GlobalTracker::create_with_allocator
/// [`get`]: GlobalTracker::get
#[derive(Debug)]
pub struct GlobalTracker {
    allocator: PersistentAllocator,
    stack_memory_size: usize,
    thread_tracker_count: AtomicU32,
    available: AvailableRegions,
    metrics: TrackerMetrics,
}

impl GlobalTracker {
    /// Installs the singleton over an already-initialized, still-empty
    /// allocator and eagerly creates the calling thread's tracker.
    ///
    /// `stack_depth` (clamped to a minimum of 2) fixes the per-thread
    /// region size for the life of the segment.
    pub fn create_with_allocator(
        allocator: PersistentAllocator,
        stack_depth: u32,
    ) -> Result<(), TrackerError> {
        if !allocator.is_empty() {
            return Err(TrackerError::AllocatorNotEmpty);
        }
        let depth = stack_depth.max(MIN_STACK_DEPTH);
        let stack_memory_size = ThreadActivityTracker::size_for_depth(depth);
        let global = Arc::new(Self {
            allocator,
            stack_memory_size,
            thread_tracker_count: AtomicU32::new(0),
            available: AvailableRegions::new(),
            metrics: TrackerMetrics::new(),
        });

        let raw = Arc::into_raw(Arc::clone(&global)).cast_mut();
        if GLOBAL
            .compare_exchange(
                std::ptr::null_mut(),
                raw,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // SAFETY: `raw` came from `Arc::into_raw` just above and was
            // never installed.
            drop(unsafe { Arc::from_raw(raw) });
            return Err(TrackerError::AlreadyExists);
        }

        tracing::info!(
            stack_depth = depth,
            region_size = stack_memory_size,
            segment = %global.allocator.name(),
            "installed global activity tracker"
        );
        global.create_tracker_for_current_thread();
        Ok(())
    }

    /// Creates the singleton over a memory-mapped file so the recorded
    /// activity survives a crash of this process.
    pub fn create_with_file(
        path: &Path,
        size: usize,
        id: u64,
        name: &str,
        stack_depth: u32,
    ) -> Result<(), TrackerError> {
        let segment = Segment::create_file(path, size)?;
        let allocator = PersistentAllocator::new(segment, id, name)?;
        Self::create_with_allocator(allocator, stack_depth)
    }

    /// Creates the singleton over an anonymous local segment.
    pub fn create_with_local_memory(
        size: usize,
        id: u64,
        name: &str,
        stack_depth: u32,
    ) -> Result<(), TrackerError> {
        let segment = Segment::anonymous(size)?;
        let allocator = PersistentAllocator::new(segment, id, name)?;
        Self::create_with_allocator(allocator, stack_depth)
    }

    /// Returns the installed singleton, if any. An atomic load plus a
    /// reference-count bump; safe to call from any thread.
    #[must_use]
    pub fn get() -> Option<Arc<Self>> {
        let raw = GLOBAL.load(Ordering::Acquire);
        if raw.is_null() {
            return None;
        }
        // SAFETY: non-null values originate from `Arc::into_raw` and the
        // teardown contract (quiescence before destroy) keeps them live
        // across this bump.
        unsafe {
            Arc::increment_strong_count(raw);
            Some(Arc::from_raw(raw))
        }
    }

    /// Uninstalls the singleton.
    ///
    /// Requires quiescence: every per-thread tracker must have been
    /// released first, and no thread may race a [`get`](Self::get)
    /// against this call.
    pub fn destroy_for_testing() -> Result<(), TrackerError> {
        let raw = GLOBAL.load(Ordering::Acquire);
        if raw.is_null() {
            return Err(TrackerError::NotInstalled);
        }
        // SAFETY: installed pointers stay live until destroyed here.
        let live = unsafe { (*raw).thread_tracker_count.load(Ordering::Acquire) };
        if live != 0 {
            return Err(TrackerError::TrackersStillLive { live });
        }
        if GLOBAL
            .compare_exchange(
                raw,
                std::ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(TrackerError::NotInstalled);
        }
        // SAFETY: this balances the `into_raw` of the installed Arc.
        drop(unsafe { Arc::from_raw(raw) });
        tracing::info!("global activity tracker destroyed");
        Ok(())
    }

    /// Creates and binds a tracker for the calling thread.
    ///
    /// The thread must not already have one bound; a bound thread keeps
    /// its existing tracker.
    pub fn create_tracker_for_current_thread(self: &Arc<Self>) {
        let _ = THIS_THREAD_TRACKER.try_with(|slot| {
            let Ok(mut slot) = slot.try_borrow_mut() else {
                return;
            };
            debug_assert!(slot.is_none());
            if slot.is_none() {
                *slot = Some(self.acquire_managed_tracker());
            }
        });
    }

    /// Unbinds and destroys the calling thread's tracker, returning its
    /// region. For tests that need quiescence without exiting threads.
    pub fn release_tracker_for_current_thread_for_testing() {
        let _ = THIS_THREAD_TRACKER.try_with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                slot.take();
            }
        });
    }

    /// Snapshots every live region of this process's segment.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<ActivitySnapshot> {
        crate::reader::scan_allocator(&self.allocator)
    }

    /// Lifecycle metrics.
    #[must_use]
    pub fn metrics(&self) -> &TrackerMetrics {
        &self.metrics
    }

    /// Number of live per-thread trackers.
    #[must_use]
    pub fn thread_tracker_count(&self) -> u32 {
        self.thread_tracker_count.load(Ordering::Relaxed)
    }

    /// Bytes of one per-thread region.
    #[must_use]
    pub fn stack_memory_size(&self) -> usize {
        self.stack_memory_size
    }

    /// References waiting on the recycle list.
    #[must_use]
    pub fn available_region_count(&self) -> u32 {
        self.available.len()
    }

    /// Pushes onto the calling thread's tracker, creating it on first
    /// touch. Returns true if a balancing pop is owed.
    pub(crate) fn record_push(origin_address: u64, kind: ActivityKind, data: ActivityData) -> bool {
        let Some(global) = Self::get() else {
            return false;
        };
        THIS_THREAD_TRACKER
            .try_with(|slot| {
                if slot.borrow().is_none() {
                    // First touch. `try_borrow_mut` also guards against
                    // re-entry while the tracker is mid-creation (the
                    // lock-acquire category may re-enter here).
                    match slot.try_borrow_mut() {
                        Ok(mut open) => *open = Some(global.acquire_managed_tracker()),
                        Err(_) => return false,
                    }
                }
                let borrow = slot.borrow();
                borrow.as_ref().map_or(false, |managed| {
                    managed.tracker.push(origin_address, kind, data);
                    true
                })
            })
            .unwrap_or(false)
    }

    /// Updates the top entry of the calling thread's tracker.
    pub(crate) fn record_change(kind: ActivityKind, data: Option<ActivityData>) {
        let _ = THIS_THREAD_TRACKER.try_with(|slot| {
            if let Ok(borrow) = slot.try_borrow() {
                if let Some(managed) = borrow.as_ref() {
                    managed.tracker.change(kind, data);
                }
            }
        });
    }

    /// Pops from the calling thread's tracker.
    pub(crate) fn record_pop() {
        let _ = THIS_THREAD_TRACKER.try_with(|slot| {
            if let Ok(borrow) = slot.try_borrow() {
                if let Some(managed) = borrow.as_ref() {
                    managed.tracker.pop();
                }
            }
        });
    }

    /// Acquires region memory and wraps it in a managed tracker.
    ///
    /// Tries the recycle list first, then a fresh persistent allocation
    /// (made iterable so external readers find it), and as a last resort
    /// transient heap memory that will not be persisted.
    fn acquire_managed_tracker(self: &Arc<Self>) -> ManagedTracker {
        let mut region = None;

        if let Some(reference) = self.available.pop() {
            // The reference still carries the free tag; resolve it, then
            // retag it live so iterating readers pick it up again.
            if let Some(base) = self.allocator.get_object(reference, TYPE_ID_TRACKER_FREE) {
                let changed =
                    self.allocator
                        .change_type(reference, TYPE_ID_TRACKER, TYPE_ID_TRACKER_FREE);
                debug_assert!(changed);
                debug_assert!(
                    self.allocator.alloc_size(reference).unwrap_or(0) >= self.stack_memory_size
                );
                self.metrics.regions_recycled.increment();
                tracing::debug!(reference, "recycled region for new thread tracker");
                region = Some((reference, base, None));
            }
        }

        if region.is_none() {
            if let Some(reference) = self.allocator.allocate(self.stack_memory_size, TYPE_ID_TRACKER)
            {
                let base = self
                    .allocator
                    .get_object(reference, TYPE_ID_TRACKER)
                    .expect("fresh allocation resolves");
                // Iterable before first use: readers tolerate a region
                // that is still zero or mid-initialization.
                self.allocator.make_iterable(reference);
                tracing::debug!(reference, "allocated region for new thread tracker");
                region = Some((reference, base, None));
            }
        }

        let (reference, base, heap) = region.unwrap_or_else(|| {
            // Persistent segment exhausted. Track the thread anyway in
            // transient memory; its data will not be persisted.
            self.metrics.heap_fallbacks.increment();
            tracing::warn!(
                live_trackers = self.thread_tracker_count.load(Ordering::Relaxed),
                "persistent segment exhausted; using transient heap region"
            );
            let layout = Layout::from_size_align(self.stack_memory_size, 8)
                .expect("region layout is valid");
            // SAFETY: layout has non-zero size (header plus two slots
            // minimum).
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            (0, ptr, Some(layout))
        });

        // SAFETY: `base` points to `stack_memory_size` bytes of zeroed or
        // previously initialized region memory that outlives the managed
        // tracker (persistent blocks are never freed; heap memory is
        // freed by the managed tracker itself).
        let tracker = unsafe { ThreadActivityTracker::new(base, self.stack_memory_size) };
        debug_assert!(tracker.is_valid());

        self.thread_tracker_count.fetch_add(1, Ordering::Relaxed);
        self.metrics.thread_trackers.increment();
        self.metrics.trackers_created.increment();

        ManagedTracker {
            tracker,
            reference,
            heap,
            global: Arc::clone(self),
        }
    }

    /// Returns a managed tracker's region on thread exit.
    fn return_tracker_memory(&self, managed: &ManagedTracker) {
        // Zero now, while a thread is exiting, rather than when the next
        // thread needs the region for actual work.
        managed.tracker.zero_region();

        debug_assert!(self.thread_tracker_count.load(Ordering::Relaxed) >= 1);
        self.thread_tracker_count.fetch_sub(1, Ordering::Relaxed);
        self.metrics.thread_trackers.decrement();

        if managed.reference != 0 {
            // Retag so iterating readers skip it, then recycle. Blocks
            // are never freed from the persistent segment.
            self.allocator
                .change_type(managed.reference, TYPE_ID_TRACKER_FREE, TYPE_ID_TRACKER);
            if self.available.push(managed.reference) {
                tracing::debug!(reference = managed.reference, "region returned for reuse");
            } else {
                self.metrics.returns_dropped.increment();
                tracing::warn!(
                    reference = managed.reference,
                    "recycle list full; region reference dropped"
                );
            }
        } else if let Some(layout) = managed.heap {
            // SAFETY: allocated with `alloc_zeroed(layout)` in
            // `acquire_managed_tracker` and freed exactly once, here.
            unsafe { std::alloc::dealloc(managed.heap_base(), layout) };
        }
    }
}

/// A thread's tracker bundled with its region reference so zeroing and
/// recycling happen automatically when the thread exits.
#[derive(Debug)]
struct ManagedTracker {
    tracker: ThreadActivityTracker,
    /// Allocator reference, or 0 for a transient heap region.
    reference: Reference,
    /// Layout of the transient heap region, if any.
    heap: Option<Layout>,
    global: Arc<GlobalTracker>,
}

impl ManagedTracker {
    fn heap_base(&self) -> *mut u8 {
        self.tracker.region_base()
    }
}

impl Drop for ManagedTracker {
    fn drop(&mut self) {
        self.global.return_tracker_memory(self);
    }
}

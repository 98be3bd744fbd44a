//! The per-thread activity tracker and its snapshot protocol.
//!
//! One tracker owns one region: a fixed-layout header followed by
//! `stack_slots` activity slots. The owning thread records with
//! `push`/`change`/`pop`; any thread in any process may `snapshot`. The
//! two sides synchronize only through atomics; the exact orderings are
//! part of the cross-process contract and must not be weakened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

use serde::Serialize;

use crate::activity::{Activity, ActivityData, ActivityKind};
use crate::clock;
use crate::tracker::layout::{
    ActivitySlot, Header, RawActivity, ACTIVITY_SIZE, HEADER_COOKIE, HEADER_SIZE,
    THREAD_NAME_SIZE,
};

/// The minimum number of activity slots a region must hold.
pub const MIN_STACK_DEPTH: u32 = 2;

/// Snapshot attempts before giving up on a region under heavy mutation.
const MAX_SNAPSHOT_ATTEMPTS: usize = 10;

/// A consistent copy of one region's identity, depth, and visible stack.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivitySnapshot {
    /// Process that owned the region when the snapshot was taken.
    pub process_id: u64,
    /// Thread that owned the region.
    pub thread_id: u64,
    /// Name of the owning thread.
    pub thread_name: String,
    /// Full push depth, which may exceed `activity_stack.len()` when the
    /// stack overflowed its slots.
    pub activity_stack_depth: u32,
    /// The visible activity entries, oldest first, with timestamps
    /// already rebased to wall-clock microseconds.
    pub activity_stack: Vec<Activity>,
}

/// Records the in-flight operations of one thread into a caller-owned
/// memory region.
///
/// Only the owning thread may call [`push`], [`change`], and [`pop`]
/// (with the documented re-entry exception for the lock-acquire
/// category); [`snapshot`] is safe from any thread or process. A tracker
/// bound to an unusable region degrades to a no-op.
///
/// [`push`]: ThreadActivityTracker::push
/// [`change`]: ThreadActivityTracker::change
/// [`pop`]: ThreadActivityTracker::pop
/// [`snapshot`]: ThreadActivityTracker::snapshot
#[derive(Debug)]
pub struct ThreadActivityTracker {
    base: *mut u8,
    stack_slots: u32,
    valid: bool,
    owner: ThreadId,
}

impl ThreadActivityTracker {
    /// Binds a tracker to `size` bytes of region memory at `base`.
    ///
    /// Zeroed memory is initialized for the calling thread; memory that
    /// already carries a header is adopted if it passes validation. A
    /// null base, a region smaller than the header plus two slots, or a
    /// slot count that does not fit in 32 bits yields a permanently
    /// invalid tracker whose operations are no-ops.
    ///
    /// # Safety
    ///
    /// `base` must be null, or point to `size` bytes of 8-byte-aligned
    /// memory that is either all zero or a previously initialized region,
    /// stays mapped for the tracker's lifetime, and is mutated only
    /// through trackers honoring this protocol.
    #[must_use]
    pub unsafe fn new(base: *mut u8, size: usize) -> Self {
        let owner = std::thread::current().id();
        let usable = !base.is_null()
            && size >= HEADER_SIZE + MIN_STACK_DEPTH as usize * ACTIVITY_SIZE
            && (size - HEADER_SIZE) / ACTIVITY_SIZE <= u32::MAX as usize;
        if !usable {
            return Self {
                base: std::ptr::null_mut(),
                stack_slots: 0,
                valid: false,
                owner,
            };
        }

        let mut tracker = Self {
            base,
            stack_slots: ((size - HEADER_SIZE) / ACTIVITY_SIZE) as u32,
            valid: true,
            owner,
        };
        if tracker.header().cookie.load(Ordering::Relaxed) == 0 {
            // Fresh region. Everything below is ordered before the final
            // release store of `process_id`, the liveness gate observers
            // acquire on.
            let header = tracker.header();
            header
                .thread_ref
                .store(current_thread_ref(), Ordering::Relaxed);
            header
                .start_time
                .store(clock::wall_time_micros(), Ordering::Relaxed);
            header
                .start_ticks
                .store(clock::ticks_micros(), Ordering::Relaxed);
            header
                .stack_slots
                .store(tracker.stack_slots, Ordering::Relaxed);
            header.write_thread_name(&current_thread_name());
            header.cookie.store(HEADER_COOKIE, Ordering::Relaxed);
            header
                .process_id
                .store(current_process_id(), Ordering::Release);
            debug_assert!(tracker.is_valid());
        } else {
            // Existing data, possibly from another process or a previous
            // owner of this memory. Adopt only if consistent.
            tracker.valid = tracker.is_valid();
        }
        tracker
    }

    /// Binds a tracker for reading only.
    ///
    /// Unlike [`new`](Self::new), zeroed memory is never initialized: a
    /// region that is still zero (or mid-initialization by its owner)
    /// simply fails validation and `snapshot` returns `None`. Scanners
    /// use this so they cannot race an owner's initialization.
    ///
    /// # Safety
    ///
    /// Same contract as [`new`](Self::new).
    #[must_use]
    pub unsafe fn for_reading(base: *mut u8, size: usize) -> Self {
        let owner = std::thread::current().id();
        let usable = !base.is_null()
            && size >= HEADER_SIZE + MIN_STACK_DEPTH as usize * ACTIVITY_SIZE
            && (size - HEADER_SIZE) / ACTIVITY_SIZE <= u32::MAX as usize;
        if !usable {
            return Self {
                base: std::ptr::null_mut(),
                stack_slots: 0,
                valid: false,
                owner,
            };
        }
        let mut tracker = Self {
            base,
            stack_slots: ((size - HEADER_SIZE) / ACTIVITY_SIZE) as u32,
            valid: true,
            owner,
        };
        tracker.valid = tracker.is_valid();
        tracker
    }

    /// Bytes required for a region holding `depth` activity slots.
    #[must_use]
    pub const fn size_for_depth(depth: u32) -> usize {
        HEADER_SIZE + depth as usize * ACTIVITY_SIZE
    }

    /// Returns true while the region passes its consistency checks.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if !self.valid {
            return false;
        }
        let header = self.header();
        header.cookie.load(Ordering::Relaxed) == HEADER_COOKIE
            && header.process_id.load(Ordering::Relaxed) != 0
            && header.thread_ref.load(Ordering::Relaxed) != 0
            && header.start_time.load(Ordering::Relaxed) != 0
            && header.start_ticks.load(Ordering::Relaxed) != 0
            && header.stack_slots.load(Ordering::Relaxed) == self.stack_slots
            && header.thread_name[THREAD_NAME_SIZE - 1].load(Ordering::Relaxed) == 0
    }

    /// Number of activity slots in the region.
    #[must_use]
    pub fn stack_slots(&self) -> u32 {
        self.stack_slots
    }

    /// Current push depth. May exceed [`stack_slots`](Self::stack_slots).
    #[must_use]
    pub fn current_depth(&self) -> u32 {
        if self.valid {
            self.header().current_depth.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Pushes a new activity onto the stack.
    ///
    /// Wait-free. When the depth already equals the slot count the push
    /// is counted but not stored. Owner-thread only, except for the
    /// lock-acquire category, which may re-enter from thread-identity
    /// primitives that themselves take a lock.
    pub fn push(&self, origin_address: u64, kind: ActivityKind, data: ActivityData) {
        if !self.valid {
            return;
        }
        debug_assert!(kind == ActivityKind::LOCK_ACQUIRE || self.on_owner_thread());
        let header = self.header();

        // No memory guarded by the depth is read here, so relaxed is
        // enough for the load.
        let depth = header.current_depth.load(Ordering::Relaxed);
        if depth >= self.stack_slots {
            // Counted but not stored; nothing new is published.
            header.current_depth.store(depth + 1, Ordering::Relaxed);
            return;
        }

        // The slot is private to this thread until the depth store below
        // makes it visible.
        self.slot(depth).record(
            clock::ticks_micros(),
            origin_address,
            kind.to_bits(),
            data.to_raw(),
        );

        // Publishes the slot contents to any acquiring reader.
        header.current_depth.store(depth + 1, Ordering::Release);
    }

    /// Updates the top-of-stack activity in place.
    ///
    /// A [`ActivityKind::NULL`] kind keeps the existing tag; `None` data
    /// keeps the existing payload. A non-null kind must keep the
    /// category of the entry it replaces. No ordering publication is
    /// needed: the slot is already visible and readers tolerate
    /// in-progress edits through the tear-detection protocol.
    pub fn change(&self, kind: ActivityKind, data: Option<ActivityData>) {
        if !self.valid {
            return;
        }
        debug_assert!(self.on_owner_thread());
        debug_assert!(!kind.is_null() || data.is_some());
        let header = self.header();

        let depth = header.current_depth.load(Ordering::Acquire);
        debug_assert!(depth > 0);
        if depth == 0 || depth > self.stack_slots {
            // Overflowed entries were never stored; nothing to update.
            return;
        }
        let slot = self.slot(depth - 1);

        if !kind.is_null() {
            debug_assert_eq!(
                ActivityKind::from_bits(slot.activity_type.load(Ordering::Relaxed) as u8)
                    .category(),
                kind.category()
            );
            slot.activity_type
                .store(u64::from(kind.to_bits()), Ordering::Relaxed);
        }
        if let Some(data) = data {
            slot.data.store(data.to_raw(), Ordering::Relaxed);
        }
    }

    /// Pops the top activity.
    ///
    /// Wait-free. Clears the tear-detection word so an in-progress
    /// snapshot knows its copy may be stale.
    pub fn pop(&self) {
        if !self.valid {
            return;
        }
        let header = self.header();

        // The decrement guards no other memory, so relaxed suffices.
        let depth = header.current_depth.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(depth > 0);
        #[cfg(debug_assertions)]
        if depth > 0 && depth <= self.stack_slots {
            let tag = self.slot(depth - 1).activity_type.load(Ordering::Relaxed) as u8;
            debug_assert!(
                ActivityKind::from_bits(tag) == ActivityKind::LOCK_ACQUIRE
                    || self.on_owner_thread()
            );
        }

        // Must be ordered after the decrement; release pairs with the
        // reader's seq_cst re-check.
        header.stack_unchanged.store(0, Ordering::Release);
    }

    /// Takes a consistent snapshot of the region.
    ///
    /// Callable from any thread or process, including after the owner
    /// has died. Returns `None` for an invalid region or when ten
    /// attempts in a row were torn by concurrent pops or a region
    /// recycle. Concurrent snapshots of the same region are not
    /// supported; the tear-detection word cannot tell readers apart.
    #[must_use]
    pub fn snapshot(&self) -> Option<ActivitySnapshot> {
        let mut out = ActivitySnapshot::default();
        self.snapshot_into(&mut out).then_some(out)
    }

    /// Like [`snapshot`](Self::snapshot), reusing the output's buffers.
    pub fn snapshot_into(&self, out: &mut ActivitySnapshot) -> bool {
        if !self.is_valid() {
            return false;
        }
        let header = self.header();

        // Reserve up front so the copy loop itself stays allocation-free.
        let mut raw: Vec<RawActivity> = Vec::with_capacity(self.stack_slots as usize);

        for _ in 0..MAX_SNAPSHOT_ATTEMPTS {
            // The acquire on process_id makes every header field written
            // before the init-time release visible.
            let starting_pid = header.process_id.load(Ordering::Acquire);
            let starting_tid = header.thread_ref.load(Ordering::Relaxed);

            // Seq_cst so the mark is totally ordered before the depth
            // load and the copy, against the writer's pop.
            header.stack_unchanged.store(1, Ordering::SeqCst);

            // Acquire pairs with the push's release publish of the slots.
            let depth = header.current_depth.load(Ordering::Acquire);
            let count = depth.min(self.stack_slots);
            raw.clear();
            for index in 0..count {
                raw.push(self.slot(index).read_raw());
            }

            // A pop during the copy cleared the word; the copy may hold
            // a frame that no longer exists.
            if header.stack_unchanged.load(Ordering::SeqCst) == 0 {
                std::thread::yield_now();
                continue;
            }

            out.activity_stack_depth = depth;
            out.thread_name = header.read_thread_name();
            out.thread_id = header.thread_ref.load(Ordering::Relaxed);
            out.process_id = header.process_id.load(Ordering::SeqCst);

            // A different identity means the region was recycled between
            // the first reads and now; everything copied is suspect.
            if out.process_id != starting_pid || out.thread_id != starting_tid {
                std::thread::yield_now();
                continue;
            }

            // The owner may have exited mid-copy, zeroing the region.
            if !self.is_valid() {
                return false;
            }

            let start_time = header.start_time.load(Ordering::Relaxed);
            let start_ticks = header.start_ticks.load(Ordering::Relaxed);
            out.activity_stack.clear();
            out.activity_stack.reserve(raw.len());
            for entry in &raw {
                let kind = ActivityKind::from_bits(entry.activity_type as u8);
                out.activity_stack.push(Activity {
                    time: start_time + (entry.time_internal - start_ticks),
                    origin_address: entry.origin_address,
                    kind,
                    call_stack: entry.call_stack,
                    data: ActivityData::from_raw(kind, entry.data),
                });
            }
            return true;
        }
        false
    }

    /// Base address of the bound region; null for an unusable tracker.
    pub(crate) fn region_base(&self) -> *mut u8 {
        self.base
    }

    /// Zeroes the whole region so the next acquirer re-initializes it.
    pub(crate) fn zero_region(&self) {
        if self.base.is_null() {
            return;
        }
        self.header().zero();
        for index in 0..self.stack_slots {
            self.slot(index).zero();
        }
    }

    fn header(&self) -> &Header {
        // SAFETY: `new` only keeps a non-null base when the region holds
        // at least a header, and the caller guaranteed alignment and
        // lifetime.
        unsafe { &*self.base.cast::<Header>() }
    }

    fn slot(&self, index: u32) -> &ActivitySlot {
        debug_assert!(index < self.stack_slots);
        // SAFETY: `stack_slots` slots follow the header by construction.
        unsafe {
            &*self
                .base
                .add(HEADER_SIZE)
                .cast::<ActivitySlot>()
                .add(index as usize)
        }
    }

    fn on_owner_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }
}

/// A process-unique, non-zero identifier for the calling thread.
///
/// Assigned from a counter on first use so it needs no platform calls;
/// the value is opaque to readers.
fn current_thread_ref() -> u64 {
    static NEXT_THREAD_REF: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_REF: u64 = NEXT_THREAD_REF.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_REF.try_with(|r| *r).unwrap_or(u64::MAX)
}

fn current_thread_name() -> String {
    std::thread::current().name().unwrap_or_default().to_owned()
}

fn current_process_id() -> u64 {
    u64::from(std::process::id()).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ACTIVITY_CALL_STACK_SIZE;
    use crate::test_utils::init_test_logging;

    /// Region memory plus a tracker bound to it. The vector must outlive
    /// the tracker.
    fn fresh_region(slots: u32) -> (Vec<u64>, ThreadActivityTracker) {
        let size = ThreadActivityTracker::size_for_depth(slots);
        let mut memory = vec![0u64; size / 8];
        // SAFETY: the vector provides zeroed, 8-byte-aligned memory of
        // exactly the requested size, alive for the test's duration.
        let tracker = unsafe { ThreadActivityTracker::new(memory.as_mut_ptr().cast(), size) };
        (memory, tracker)
    }

    #[test]
    fn construction_initializes_header() {
        init_test_logging();
        let (_memory, tracker) = fresh_region(4);
        assert!(tracker.is_valid());
        assert_eq!(tracker.stack_slots(), 4);
        assert_eq!(tracker.current_depth(), 0);

        let snapshot = tracker.snapshot().expect("snapshot");
        assert_ne!(snapshot.process_id, 0);
        assert_ne!(snapshot.thread_id, 0);
        assert_eq!(snapshot.activity_stack_depth, 0);
        assert!(snapshot.activity_stack.is_empty());
    }

    #[test]
    fn rejects_null_and_undersized_regions() {
        init_test_logging();
        // SAFETY: null base is explicitly tolerated.
        let null = unsafe { ThreadActivityTracker::new(std::ptr::null_mut(), 4096) };
        assert!(!null.is_valid());
        null.push(0, ActivityKind::GENERIC, ActivityData::Generic { id: 1, info: 0 });
        assert_eq!(null.current_depth(), 0);
        assert!(null.snapshot().is_none());

        // One slot short of the two-slot minimum.
        let size = ThreadActivityTracker::size_for_depth(MIN_STACK_DEPTH) - 1;
        let mut memory = vec![0u64; ThreadActivityTracker::size_for_depth(MIN_STACK_DEPTH) / 8];
        // SAFETY: memory covers more than `size` bytes.
        let small = unsafe { ThreadActivityTracker::new(memory.as_mut_ptr().cast(), size) };
        assert!(!small.is_valid());
    }

    #[test]
    fn push_change_pop_happy_path() {
        init_test_logging();
        let (_memory, tracker) = fresh_region(4);

        tracker.push(0x100, ActivityKind::GENERIC, ActivityData::Generic { id: 7, info: 0 });
        let snap = tracker.snapshot().expect("snapshot");
        assert_eq!(snap.activity_stack_depth, 1);
        assert_eq!(
            snap.activity_stack[0].data,
            ActivityData::Generic { id: 7, info: 0 }
        );

        tracker.push(0x200, ActivityKind::TASK_RUN, ActivityData::Task { sequence_id: 42 });
        let snap = tracker.snapshot().expect("snapshot");
        assert_eq!(snap.activity_stack_depth, 2);
        assert_eq!(snap.activity_stack[0].origin_address, 0x100);
        assert_eq!(
            snap.activity_stack[1].data,
            ActivityData::Task { sequence_id: 42 }
        );

        // Change only the payload of the top entry.
        tracker.change(
            ActivityKind::NULL,
            Some(ActivityData::Task { sequence_id: 43 }),
        );
        let snap = tracker.snapshot().expect("snapshot");
        assert_eq!(snap.activity_stack_depth, 2);
        assert_eq!(
            snap.activity_stack[1].data,
            ActivityData::Task { sequence_id: 43 }
        );

        tracker.pop();
        let snap = tracker.snapshot().expect("snapshot");
        assert_eq!(snap.activity_stack_depth, 1);
        assert_eq!(
            snap.activity_stack[0].data,
            ActivityData::Generic { id: 7, info: 0 }
        );

        tracker.pop();
        let snap = tracker.snapshot().expect("snapshot");
        assert_eq!(snap.activity_stack_depth, 0);
        assert!(snap.activity_stack.is_empty());
    }

    #[test]
    fn change_keeps_category_and_updates_action() {
        init_test_logging();
        let (_memory, tracker) = fresh_region(2);
        tracker.push(0, ActivityKind::generic(1), ActivityData::Generic { id: 9, info: 1 });
        tracker.change(
            ActivityKind::generic(5),
            Some(ActivityData::Generic { id: 9, info: -3 }),
        );

        let snap = tracker.snapshot().expect("snapshot");
        assert_eq!(snap.activity_stack[0].kind.action(), 5);
        assert_eq!(
            snap.activity_stack[0].data,
            ActivityData::Generic { id: 9, info: -3 }
        );
    }

    #[test]
    fn overflow_is_counted_but_not_stored() {
        init_test_logging();
        let (_memory, tracker) = fresh_region(2);
        for id in 0..4 {
            tracker.push(
                u64::from(id),
                ActivityKind::GENERIC,
                ActivityData::Generic { id, info: 0 },
            );
        }

        let snap = tracker.snapshot().expect("snapshot");
        assert_eq!(snap.activity_stack_depth, 4);
        assert_eq!(snap.activity_stack.len(), 2);
        assert_eq!(
            snap.activity_stack[0].data,
            ActivityData::Generic { id: 0, info: 0 }
        );
        assert_eq!(
            snap.activity_stack[1].data,
            ActivityData::Generic { id: 1, info: 0 }
        );

        tracker.pop();
        tracker.pop();
        assert_eq!(tracker.current_depth(), 2);
        tracker.pop();
        tracker.pop();
        assert_eq!(tracker.current_depth(), 0);
    }

    #[test]
    fn snapshot_rebases_time_onto_wall_clock() {
        init_test_logging();
        let (_memory, tracker) = fresh_region(2);
        let before = crate::clock::wall_time_micros();
        tracker.push(0, ActivityKind::EVENT_WAIT, ActivityData::Event { event_address: 1 });
        let after = crate::clock::wall_time_micros();

        let snap = tracker.snapshot().expect("snapshot");
        let time = snap.activity_stack[0].time;
        // Wall and tick clocks are sampled separately; allow a little
        // skew between them.
        let slack = 5_000;
        assert!(
            time >= before - slack && time <= after + slack,
            "time {time} outside [{before}, {after}]"
        );
    }

    #[test]
    fn empty_call_stack_is_zero_terminated() {
        init_test_logging();
        let (_memory, tracker) = fresh_region(2);
        tracker.push(0, ActivityKind::GENERIC, ActivityData::Generic { id: 1, info: 0 });
        let snap = tracker.snapshot().expect("snapshot");
        assert_eq!(
            snap.activity_stack[0].call_stack,
            [0u64; ACTIVITY_CALL_STACK_SIZE]
        );
    }

    #[test]
    fn adopts_existing_valid_region() {
        init_test_logging();
        let (mut memory, tracker) = fresh_region(4);
        tracker.push(0x42, ActivityKind::TASK_RUN, ActivityData::Task { sequence_id: 1 });
        drop(tracker);

        let size = ThreadActivityTracker::size_for_depth(4);
        // SAFETY: same live memory, previously initialized.
        let adopted = unsafe { ThreadActivityTracker::new(memory.as_mut_ptr().cast(), size) };
        assert!(adopted.is_valid());
        let snap = adopted.snapshot().expect("snapshot");
        assert_eq!(snap.activity_stack_depth, 1);
        assert_eq!(snap.activity_stack[0].origin_address, 0x42);
    }

    #[test]
    fn rejects_corrupt_cookie() {
        init_test_logging();
        let (mut memory, tracker) = fresh_region(4);
        drop(tracker);
        memory[0] = 0x1234_5678_9ABC_DEF0; // overwrite the cookie

        let size = ThreadActivityTracker::size_for_depth(4);
        // SAFETY: same live memory.
        let adopted = unsafe { ThreadActivityTracker::new(memory.as_mut_ptr().cast(), size) };
        assert!(!adopted.is_valid());
        assert!(adopted.snapshot().is_none());
    }

    #[test]
    fn zeroed_region_reinitializes_from_scratch() {
        init_test_logging();
        let (mut memory, tracker) = fresh_region(4);
        tracker.push(0, ActivityKind::GENERIC, ActivityData::Generic { id: 1, info: 0 });
        tracker.zero_region();
        drop(tracker);
        assert!(memory.iter().all(|&word| word == 0));

        let size = ThreadActivityTracker::size_for_depth(4);
        // SAFETY: same live memory, zeroed above.
        let fresh = unsafe { ThreadActivityTracker::new(memory.as_mut_ptr().cast(), size) };
        assert!(fresh.is_valid());
        assert_eq!(fresh.current_depth(), 0);
    }

    #[test]
    fn long_thread_name_is_truncated_with_nul() {
        init_test_logging();
        let name = "x".repeat(40);
        let expected = "x".repeat(THREAD_NAME_SIZE - 1);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let (_memory, tracker) = fresh_region(2);
                let snap = tracker.snapshot().expect("snapshot");
                assert_eq!(snap.thread_name, expected);
                assert!(tracker.is_valid());
            })
            .expect("spawn");
        handle.join().expect("join");
    }

    #[test]
    fn size_for_depth_matches_layout() {
        assert_eq!(
            ThreadActivityTracker::size_for_depth(0),
            HEADER_SIZE
        );
        assert_eq!(
            ThreadActivityTracker::size_for_depth(5),
            HEADER_SIZE + 5 * ACTIVITY_SIZE
        );
    }
}

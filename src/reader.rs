//! External snapshot scanning.
//!
//! A scanner walks a segment's iterable allocator records, picks out the
//! regions that currently belong to live thread trackers, and snapshots
//! each one with the torn-read protocol. The segment may belong to the
//! running process, to another live process, or to a process that has
//! already crashed — a mapped file is read the same way in all three
//! cases.

use std::path::Path;

use crate::error::TrackerError;
use crate::persist::{PersistentAllocator, Segment};
use crate::tracker::global::TYPE_ID_TRACKER;
use crate::tracker::thread::{ActivitySnapshot, ThreadActivityTracker};

/// Snapshots every live tracker region discoverable through `allocator`.
///
/// Regions that are zeroed, mid-initialization, recycled mid-read, or
/// otherwise inconsistent are skipped; whatever can be read consistently
/// is returned.
#[must_use]
pub fn scan_allocator(allocator: &PersistentAllocator) -> Vec<ActivitySnapshot> {
    let mut snapshots = Vec::new();
    for (reference, type_id) in allocator.iter() {
        if type_id != TYPE_ID_TRACKER {
            continue;
        }
        let Some(base) = allocator.get_object(reference, TYPE_ID_TRACKER) else {
            continue;
        };
        let Some(size) = allocator.alloc_size(reference) else {
            continue;
        };
        // SAFETY: the allocator bound-checked the block, blocks are
        // 8-byte aligned and never freed, and the region is mutated only
        // by trackers honoring the snapshot protocol.
        let tracker = unsafe { ThreadActivityTracker::for_reading(base, size) };
        if let Some(snapshot) = tracker.snapshot() {
            snapshots.push(snapshot);
        } else {
            tracing::debug!(reference, "skipping unreadable tracker region");
        }
    }
    snapshots
}

/// Reads thread activity out of a persistent segment.
///
/// ```ignore
/// let scanner = ActivityScanner::open_file(Path::new("crashed.trace"))?;
/// for snapshot in scanner.snapshots() {
///     println!("{}: {} frames", snapshot.thread_name, snapshot.activity_stack.len());
/// }
/// ```
#[derive(Debug)]
pub struct ActivityScanner {
    allocator: PersistentAllocator,
}

impl ActivityScanner {
    /// Wraps an already-attached allocator.
    #[must_use]
    pub fn new(allocator: PersistentAllocator) -> Self {
        Self { allocator }
    }

    /// Maps an existing segment file, validating its allocator metadata.
    pub fn open_file(path: &Path) -> Result<Self, TrackerError> {
        let segment = Segment::open_file(path)?;
        let allocator = PersistentAllocator::attach(segment)?;
        tracing::debug!(path = %path.display(), id = allocator.id(), "opened segment for scanning");
        Ok(Self { allocator })
    }

    /// The segment id recorded at creation.
    #[must_use]
    pub fn segment_id(&self) -> u64 {
        self.allocator.id()
    }

    /// The segment name recorded at creation.
    #[must_use]
    pub fn segment_name(&self) -> String {
        self.allocator.name()
    }

    /// Snapshots every live tracker region in the segment.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ActivitySnapshot> {
        scan_allocator(&self.allocator)
    }
}

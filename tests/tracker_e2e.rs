//! End-to-end recording and snapshotting over allocator-backed regions.

use threadprobe::test_utils::init_test_logging;
use threadprobe::tracker::global::TYPE_ID_TRACKER;
use threadprobe::tracker::thread::MIN_STACK_DEPTH;
use threadprobe::{
    ActivityData, ActivityKind, PersistentAllocator, Segment, ThreadActivityTracker,
};

/// Allocates a region for `slots` activities and binds an owner tracker
/// to it, returning the tracker plus the region's base and size for
/// additional reader views.
fn owner_tracker(
    allocator: &PersistentAllocator,
    slots: u32,
) -> (ThreadActivityTracker, *mut u8, usize) {
    let size = ThreadActivityTracker::size_for_depth(slots);
    let reference = allocator.allocate(size, TYPE_ID_TRACKER).expect("allocate region");
    allocator.make_iterable(reference);
    let base = allocator
        .get_object(reference, TYPE_ID_TRACKER)
        .expect("resolve region");
    // SAFETY: freshly allocated, zeroed, 8-byte-aligned block of exactly
    // `size` bytes; the allocator (and its segment) outlive the test.
    let tracker = unsafe { ThreadActivityTracker::new(base, size) };
    (tracker, base, size)
}

fn test_allocator() -> PersistentAllocator {
    init_test_logging();
    let segment = Segment::anonymous(1 << 16).expect("map segment");
    PersistentAllocator::new(segment, 1, "tracker-e2e").expect("init allocator")
}

#[test]
fn reader_view_follows_owner_step_by_step() {
    let allocator = test_allocator();
    let (owner, base, size) = owner_tracker(&allocator, 4);
    // SAFETY: same region as above, read-only protocol use.
    let reader = unsafe { ThreadActivityTracker::for_reading(base, size) };
    assert!(reader.is_valid());

    owner.push(0x100, ActivityKind::GENERIC, ActivityData::Generic { id: 7, info: 0 });
    let snap = reader.snapshot().expect("snapshot after first push");
    assert_eq!(snap.activity_stack_depth, 1);
    assert_eq!(snap.activity_stack[0].data, ActivityData::Generic { id: 7, info: 0 });

    owner.push(0x200, ActivityKind::TASK_RUN, ActivityData::Task { sequence_id: 42 });
    let snap = reader.snapshot().expect("snapshot after second push");
    assert_eq!(snap.activity_stack_depth, 2);
    assert_eq!(
        snap.activity_stack[1].data,
        ActivityData::Task { sequence_id: 42 }
    );

    owner.pop();
    let snap = reader.snapshot().expect("snapshot after pop");
    assert_eq!(snap.activity_stack_depth, 1);
    assert_eq!(snap.activity_stack[0].data, ActivityData::Generic { id: 7, info: 0 });

    owner.change(ActivityKind::NULL, Some(ActivityData::Generic { id: 7, info: 9 }));
    let snap = reader.snapshot().expect("snapshot after change");
    assert_eq!(snap.activity_stack_depth, 1);
    assert_eq!(snap.activity_stack[0].data, ActivityData::Generic { id: 7, info: 9 });

    owner.pop();
    let snap = reader.snapshot().expect("snapshot after final pop");
    assert_eq!(snap.activity_stack_depth, 0);
    assert!(snap.activity_stack.is_empty());
}

#[test]
fn overflow_preserves_stack_base() {
    let allocator = test_allocator();
    let (owner, base, size) = owner_tracker(&allocator, 2);
    // SAFETY: same region, reader protocol.
    let reader = unsafe { ThreadActivityTracker::for_reading(base, size) };

    for id in 0..4u32 {
        owner.push(
            u64::from(id),
            ActivityKind::GENERIC,
            ActivityData::Generic { id, info: 0 },
        );
    }

    let snap = reader.snapshot().expect("snapshot");
    assert_eq!(snap.activity_stack_depth, 4);
    assert_eq!(snap.activity_stack.len(), 2);
    assert_eq!(snap.activity_stack[0].data, ActivityData::Generic { id: 0, info: 0 });
    assert_eq!(snap.activity_stack[1].data, ActivityData::Generic { id: 1, info: 0 });

    owner.pop();
    owner.pop();
    assert_eq!(owner.current_depth(), 2);
    owner.pop();
    owner.pop();
    assert_eq!(owner.current_depth(), 0);
}

#[test]
fn minimum_depth_region_is_usable() {
    let allocator = test_allocator();
    let (owner, _, _) = owner_tracker(&allocator, MIN_STACK_DEPTH);
    assert!(owner.is_valid());
    assert_eq!(owner.stack_slots(), MIN_STACK_DEPTH);

    owner.push(0, ActivityKind::EVENT_WAIT, ActivityData::Event { event_address: 1 });
    owner.push(0, ActivityKind::EVENT_WAIT, ActivityData::Event { event_address: 2 });
    assert_eq!(owner.current_depth(), 2);

    // A third push overflows: counted, not stored.
    owner.push(0, ActivityKind::EVENT_WAIT, ActivityData::Event { event_address: 3 });
    let snap = owner.snapshot().expect("snapshot");
    assert_eq!(snap.activity_stack_depth, 3);
    assert_eq!(snap.activity_stack.len(), 2);
}

#[test]
fn reader_rejects_zeroed_region() {
    let allocator = test_allocator();
    let size = ThreadActivityTracker::size_for_depth(4);
    let reference = allocator.allocate(size, TYPE_ID_TRACKER).expect("allocate region");
    let base = allocator
        .get_object(reference, TYPE_ID_TRACKER)
        .expect("resolve region");

    // No owner has initialized this region yet.
    // SAFETY: valid zeroed block of `size` bytes.
    let reader = unsafe { ThreadActivityTracker::for_reading(base, size) };
    assert!(!reader.is_valid());
    assert!(reader.snapshot().is_none());
}

#[test]
fn snapshot_serializes_to_json() {
    let allocator = test_allocator();
    let (owner, _, _) = owner_tracker(&allocator, 4);
    owner.push(0x77, ActivityKind::TASK_RUN, ActivityData::Task { sequence_id: 3 });

    let snap = owner.snapshot().expect("snapshot");
    let json = serde_json::to_value(&snap).expect("serialize");
    assert_eq!(json["activity_stack_depth"], 1);
    assert_eq!(json["activity_stack"][0]["origin_address"], 0x77);
    assert_eq!(
        json["activity_stack"][0]["data"]["Task"]["sequence_id"],
        3
    );
}

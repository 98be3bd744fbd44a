//! Exact binary layout of a thread's activity region.
//!
//! The layout is shared with external readers, byte for byte: a header at
//! offset 0 followed by a contiguous array of activity slots. Every field
//! that an observer may read concurrently with the owner is an atomic, so
//! the "plain" stores of the recording protocol are relaxed atomic stores
//! and the published fields use the orderings the protocol prescribes.
//! Multi-byte scalars are little-endian-native.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::activity::ACTIVITY_CALL_STACK_SIZE;

/// Identifies an initialized region; the low bits carry the schema
/// version. Zero means "uninitialized". Readers reject any other value.
pub(crate) const HEADER_COOKIE: u64 = 0xC002_9B24_0D4A_3092 + 1; // v1

/// Capacity of the embedded thread name, including the NUL terminator.
pub(crate) const THREAD_NAME_SIZE: usize = 32;

/// Fixed-layout preamble of a region.
///
/// Initialization writes `process_id` last with release ordering; an
/// observer that reads a non-zero `process_id` with acquire ordering sees
/// every other field initialized.
#[repr(C)]
pub(crate) struct Header {
    /// [`HEADER_COOKIE`] once initialized.
    pub cookie: AtomicU64,
    /// Owning process; non-zero gates region liveness.
    pub process_id: AtomicU64,
    /// Owning thread id or native handle, widened to 64 bits.
    pub thread_ref: AtomicU64,
    /// Wall-clock microseconds at initialization.
    pub start_time: AtomicI64,
    /// Monotonic tick microseconds at initialization.
    pub start_ticks: AtomicI64,
    /// Number of activity slots following the header.
    pub stack_slots: AtomicU32,
    /// Pushes minus pops; may exceed `stack_slots`.
    pub current_depth: AtomicU32,
    /// Tear-detection word: readers set 1 before copying, the owner
    /// clears to 0 on every pop.
    pub stack_unchanged: AtomicU32,
    /// NUL-terminated thread name.
    pub thread_name: [AtomicU8; THREAD_NAME_SIZE],
}

/// One stored activity: 112 bytes, 8-byte aligned, payload word 8-byte
/// aligned. The kind tag occupies the low byte of its word; the upper
/// bytes stay zero.
#[repr(C)]
pub(crate) struct ActivitySlot {
    pub time_internal: AtomicI64,
    pub origin_address: AtomicU64,
    pub activity_type: AtomicU64,
    pub call_stack: [AtomicU64; ACTIVITY_CALL_STACK_SIZE],
    pub data: AtomicU64,
}

/// Header size in bytes, part of the external layout.
pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<Header>();
/// Slot size in bytes, part of the external layout.
pub(crate) const ACTIVITY_SIZE: usize = std::mem::size_of::<ActivitySlot>();

const _: () = {
    assert!(HEADER_SIZE == 88);
    assert!(ACTIVITY_SIZE == 112);
    assert!(std::mem::align_of::<Header>() == 8);
    assert!(std::mem::align_of::<ActivitySlot>() == 8);
    assert!(std::mem::offset_of!(Header, process_id) == 8);
    assert!(std::mem::offset_of!(Header, thread_ref) == 16);
    assert!(std::mem::offset_of!(Header, start_time) == 24);
    assert!(std::mem::offset_of!(Header, start_ticks) == 32);
    assert!(std::mem::offset_of!(Header, stack_slots) == 40);
    assert!(std::mem::offset_of!(Header, current_depth) == 44);
    assert!(std::mem::offset_of!(Header, stack_unchanged) == 48);
    assert!(std::mem::offset_of!(Header, thread_name) == 52);
    assert!(std::mem::offset_of!(ActivitySlot, call_stack) == 24);
    assert!(std::mem::offset_of!(ActivitySlot, data) % 8 == 0);
};

/// Word-by-word copy of a slot, taken before the torn-read check has
/// confirmed it; values may be inconsistent until the attempt succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawActivity {
    pub time_internal: i64,
    pub origin_address: u64,
    pub activity_type: u64,
    pub call_stack: [u64; ACTIVITY_CALL_STACK_SIZE],
    pub data: u64,
}

impl ActivitySlot {
    /// Fills the slot with relaxed stores. The memory is private to the
    /// owner until the depth that covers it is published with release.
    pub(crate) fn record(&self, time_internal: i64, origin_address: u64, tag: u8, data: u64) {
        self.time_internal.store(time_internal, Ordering::Relaxed);
        self.origin_address.store(origin_address, Ordering::Relaxed);
        self.activity_type.store(u64::from(tag), Ordering::Relaxed);
        self.data.store(data, Ordering::Relaxed);
    }

    /// Reads every word of the slot with relaxed loads.
    pub(crate) fn read_raw(&self) -> RawActivity {
        let mut call_stack = [0u64; ACTIVITY_CALL_STACK_SIZE];
        for (out, word) in call_stack.iter_mut().zip(&self.call_stack) {
            *out = word.load(Ordering::Relaxed);
        }
        RawActivity {
            time_internal: self.time_internal.load(Ordering::Relaxed),
            origin_address: self.origin_address.load(Ordering::Relaxed),
            activity_type: self.activity_type.load(Ordering::Relaxed),
            call_stack,
            data: self.data.load(Ordering::Relaxed),
        }
    }

    /// Clears every word of the slot.
    pub(crate) fn zero(&self) {
        self.time_internal.store(0, Ordering::Relaxed);
        self.origin_address.store(0, Ordering::Relaxed);
        self.activity_type.store(0, Ordering::Relaxed);
        for word in &self.call_stack {
            word.store(0, Ordering::Relaxed);
        }
        self.data.store(0, Ordering::Relaxed);
    }
}

impl Header {
    /// Clears every field of the header.
    ///
    /// Publication to the next acquirer happens through the recycle
    /// list's release/acquire pair, not here.
    pub(crate) fn zero(&self) {
        self.cookie.store(0, Ordering::Relaxed);
        self.process_id.store(0, Ordering::Relaxed);
        self.thread_ref.store(0, Ordering::Relaxed);
        self.start_time.store(0, Ordering::Relaxed);
        self.start_ticks.store(0, Ordering::Relaxed);
        self.stack_slots.store(0, Ordering::Relaxed);
        self.current_depth.store(0, Ordering::Relaxed);
        self.stack_unchanged.store(0, Ordering::Relaxed);
        for byte in &self.thread_name {
            byte.store(0, Ordering::Relaxed);
        }
    }

    /// Copies all name bytes, then truncates at the first NUL.
    pub(crate) fn read_thread_name(&self) -> String {
        let mut bytes = [0u8; THREAD_NAME_SIZE];
        for (out, slot) in bytes.iter_mut().zip(&self.thread_name) {
            *out = slot.load(Ordering::Relaxed);
        }
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(THREAD_NAME_SIZE - 1);
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// Writes a truncated, NUL-terminated thread name.
    pub(crate) fn write_thread_name(&self, name: &str) {
        let bytes = name.as_bytes();
        let copy = bytes.len().min(THREAD_NAME_SIZE - 1);
        for (slot, &byte) in self.thread_name.iter().zip(&bytes[..copy]) {
            slot.store(byte, Ordering::Relaxed);
        }
    }
}

//! Activity kinds, payloads, and snapshot records.
//!
//! An activity is one entry in a thread's stack of in-flight operations.
//! Its 8-bit kind tag splits into a *category* (high nibble) naming the
//! operation family and an *action* (low nibble) sub-classifying within
//! the generic family. The payload is a single 64-bit word whose meaning
//! is keyed by the category.

use serde::Serialize;

/// Number of call-stack entries stored with one activity.
///
/// The stored chain is 0-terminated when shorter than this capacity.
pub const ACTIVITY_CALL_STACK_SIZE: usize = 10;

/// The family of an in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActivityCategory {
    /// User-defined activity, sub-classified by the action bits.
    Generic,
    /// Running a posted task.
    TaskRun,
    /// Acquiring a lock.
    LockAcquire,
    /// Waiting on an event.
    EventWait,
    /// Joining another thread.
    ThreadJoin,
    /// Waiting on another process.
    ProcessWait,
}

impl ActivityCategory {
    /// Returns the category encoded in the high nibble of a kind tag.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits & ActivityKind::CATEGORY_MASK {
            0x10 => Some(Self::Generic),
            0x20 => Some(Self::TaskRun),
            0x30 => Some(Self::LockAcquire),
            0x40 => Some(Self::EventWait),
            0x50 => Some(Self::ThreadJoin),
            0x60 => Some(Self::ProcessWait),
            _ => None,
        }
    }

    /// Returns the high-nibble encoding of this category.
    #[must_use]
    pub const fn to_bits(self) -> u8 {
        match self {
            Self::Generic => 0x10,
            Self::TaskRun => 0x20,
            Self::LockAcquire => 0x30,
            Self::EventWait => 0x40,
            Self::ThreadJoin => 0x50,
            Self::ProcessWait => 0x60,
        }
    }
}

/// The 8-bit tag identifying what kind of operation an activity records.
///
/// The high nibble is the [`ActivityCategory`]; the low nibble is a
/// caller-chosen action used only by the generic category. The reserved
/// [`ActivityKind::NULL`] value means "do not change" when passed to an
/// update operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ActivityKind(u8);

impl ActivityKind {
    /// Mask selecting the category bits of a kind tag.
    pub const CATEGORY_MASK: u8 = 0xF0;
    /// Mask selecting the action bits of a kind tag.
    pub const ACTION_MASK: u8 = 0x0F;

    /// Reserved "no change" tag.
    pub const NULL: Self = Self(0);
    /// User-defined activity with action 0.
    pub const GENERIC: Self = Self(0x10);
    /// Running a posted task.
    pub const TASK_RUN: Self = Self(0x20);
    /// Acquiring a lock.
    pub const LOCK_ACQUIRE: Self = Self(0x30);
    /// Waiting on an event.
    pub const EVENT_WAIT: Self = Self(0x40);
    /// Joining another thread.
    pub const THREAD_JOIN: Self = Self(0x50);
    /// Waiting on another process.
    pub const PROCESS_WAIT: Self = Self(0x60);

    /// A generic kind carrying the given action in its low nibble.
    ///
    /// The action must not touch the category bits.
    #[must_use]
    pub fn generic(action: u8) -> Self {
        debug_assert_eq!(action & Self::CATEGORY_MASK, 0);
        Self(Self::GENERIC.0 | (action & Self::ACTION_MASK))
    }

    /// Reconstructs a kind from its raw tag byte.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns the raw tag byte.
    #[must_use]
    pub const fn to_bits(self) -> u8 {
        self.0
    }

    /// Returns the category, if the tag names a known one.
    #[must_use]
    pub const fn category(self) -> Option<ActivityCategory> {
        ActivityCategory::from_bits(self.0)
    }

    /// Returns the action bits (meaningful for the generic category).
    #[must_use]
    pub const fn action(self) -> u8 {
        self.0 & Self::ACTION_MASK
    }

    /// Returns true for the reserved "no change" tag.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// The category-keyed payload of one activity.
///
/// Every variant occupies a single 64-bit word in the stored form; the
/// category of the accompanying [`ActivityKind`] selects the decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityData {
    /// User-supplied identifier and state for a generic activity.
    Generic {
        /// Caller-chosen identifier.
        id: u32,
        /// Caller-chosen state value, mutable in place.
        info: i32,
    },
    /// The sequence number of the task being run.
    Task {
        /// Sequence number assigned when the task was posted.
        sequence_id: u64,
    },
    /// The address of the lock being acquired.
    Lock {
        /// Address of the lock object.
        lock_address: u64,
    },
    /// The address of the event being waited on.
    Event {
        /// Address of the event object.
        event_address: u64,
    },
    /// The identity of the thread being joined.
    Thread {
        /// Numeric thread id or native handle value.
        thread_id: u64,
    },
    /// The process being waited on.
    Process {
        /// Process id of the target.
        pid: u64,
    },
}

impl ActivityData {
    /// Encodes the payload into its stored 64-bit form.
    ///
    /// The generic variant packs `id` into the low half and `info` into
    /// the high half; all other variants are a single value already.
    #[must_use]
    pub(crate) const fn to_raw(self) -> u64 {
        match self {
            Self::Generic { id, info } => (id as u64) | ((info as u32 as u64) << 32),
            Self::Task { sequence_id } => sequence_id,
            Self::Lock { lock_address } => lock_address,
            Self::Event { event_address } => event_address,
            Self::Thread { thread_id } => thread_id,
            Self::Process { pid } => pid,
        }
    }

    /// Decodes a stored payload word using the kind's category.
    ///
    /// Unknown categories decode as generic so that damaged regions can
    /// still be inspected.
    #[must_use]
    pub(crate) const fn from_raw(kind: ActivityKind, raw: u64) -> Self {
        match kind.category() {
            Some(ActivityCategory::TaskRun) => Self::Task { sequence_id: raw },
            Some(ActivityCategory::LockAcquire) => Self::Lock { lock_address: raw },
            Some(ActivityCategory::EventWait) => Self::Event { event_address: raw },
            Some(ActivityCategory::ThreadJoin) => Self::Thread { thread_id: raw },
            Some(ActivityCategory::ProcessWait) => Self::Process { pid: raw },
            Some(ActivityCategory::Generic) | None => Self::Generic {
                id: raw as u32,
                info: (raw >> 32) as u32 as i32,
            },
        }
    }
}

/// One decoded entry of a thread's activity stack, as seen in a snapshot.
///
/// `time` is in wall-clock microseconds: the stored monotonic tick value
/// has already been rebased against the region's start-time origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Activity {
    /// Wall-clock microseconds at which the activity was pushed.
    pub time: i64,
    /// Opaque call-site identifier (e.g. a program counter).
    pub origin_address: u64,
    /// What kind of operation this entry records.
    pub kind: ActivityKind,
    /// Optional call chain, 0-terminated if shorter than capacity.
    pub call_stack: [u64; ACTIVITY_CALL_STACK_SIZE],
    /// Category-keyed payload.
    pub data: ActivityData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_splits_category_and_action() {
        let kind = ActivityKind::generic(0x7);
        assert_eq!(kind.category(), Some(ActivityCategory::Generic));
        assert_eq!(kind.action(), 0x7);
        assert_eq!(kind.to_bits(), 0x17);

        assert_eq!(
            ActivityKind::LOCK_ACQUIRE.category(),
            Some(ActivityCategory::LockAcquire)
        );
        assert_eq!(ActivityKind::LOCK_ACQUIRE.action(), 0);
    }

    #[test]
    fn null_kind_is_reserved() {
        assert!(ActivityKind::NULL.is_null());
        assert_eq!(ActivityKind::NULL.category(), None);
        assert!(!ActivityKind::GENERIC.is_null());
    }

    #[test]
    fn category_bits_round_trip() {
        for category in [
            ActivityCategory::Generic,
            ActivityCategory::TaskRun,
            ActivityCategory::LockAcquire,
            ActivityCategory::EventWait,
            ActivityCategory::ThreadJoin,
            ActivityCategory::ProcessWait,
        ] {
            assert_eq!(ActivityCategory::from_bits(category.to_bits()), Some(category));
        }
        assert_eq!(ActivityCategory::from_bits(0x00), None);
        assert_eq!(ActivityCategory::from_bits(0xF0), None);
    }

    #[test]
    fn generic_payload_packs_both_halves() {
        let data = ActivityData::Generic { id: 7, info: -9 };
        let raw = data.to_raw();
        assert_eq!(raw as u32, 7);
        assert_eq!(ActivityData::from_raw(ActivityKind::GENERIC, raw), data);
    }

    #[test]
    fn payload_decodes_by_category() {
        let cases = [
            (ActivityKind::TASK_RUN, ActivityData::Task { sequence_id: 42 }),
            (
                ActivityKind::LOCK_ACQUIRE,
                ActivityData::Lock {
                    lock_address: 0xDEAD,
                },
            ),
            (
                ActivityKind::EVENT_WAIT,
                ActivityData::Event {
                    event_address: 0xBEEF,
                },
            ),
            (
                ActivityKind::THREAD_JOIN,
                ActivityData::Thread { thread_id: 99 },
            ),
            (
                ActivityKind::PROCESS_WAIT,
                ActivityData::Process { pid: 4321 },
            ),
        ];
        for (kind, data) in cases {
            assert_eq!(ActivityData::from_raw(kind, data.to_raw()), data);
        }
    }

    #[test]
    fn unknown_category_decodes_as_generic() {
        let decoded = ActivityData::from_raw(ActivityKind::from_bits(0xF0), 5);
        assert_eq!(decoded, ActivityData::Generic { id: 5, info: 0 });
    }
}

//! Scoped RAII recording of in-flight operations.
//!
//! Each wrapper pushes one activity onto the calling thread's tracker at
//! construction and pops it on drop. Construction finds (or first-touch
//! creates) the thread's tracker through the global singleton; without
//! an installed singleton every wrapper is a silent no-op.
//!
//! The wrappers do not hold a reference to the tracker: they re-resolve
//! it through thread-local storage on drop, so they can never extend its
//! lifetime. Thread-local destruction order guarantees the tracker
//! outlives every scope on its thread.

use crate::activity::{ActivityData, ActivityKind};
use crate::tracker::global::GlobalTracker;

/// Records a user-defined activity for the duration of a scope.
///
/// The action and info of the recorded entry can be changed in place
/// while the scope is live.
#[derive(Debug)]
pub struct ScopedActivity {
    pushed: bool,
    id: u32,
}

impl ScopedActivity {
    /// Pushes a generic activity identified by a call-site address, a
    /// sub-classifying action (category bits must be zero), and a
    /// caller-chosen id/info pair.
    #[must_use]
    pub fn new(origin_address: u64, action: u8, id: u32, info: i32) -> Self {
        debug_assert_eq!(action & ActivityKind::CATEGORY_MASK, 0);
        let pushed = GlobalTracker::record_push(
            origin_address,
            ActivityKind::generic(action),
            ActivityData::Generic { id, info },
        );
        Self { pushed, id }
    }

    /// Replaces the action bits of the recorded entry.
    pub fn change_action(&self, action: u8) {
        debug_assert_eq!(action & ActivityKind::CATEGORY_MASK, 0);
        if self.pushed {
            GlobalTracker::record_change(ActivityKind::generic(action), None);
        }
    }

    /// Replaces the info value of the recorded entry.
    pub fn change_info(&self, info: i32) {
        if self.pushed {
            GlobalTracker::record_change(
                ActivityKind::NULL,
                Some(ActivityData::Generic { id: self.id, info }),
            );
        }
    }

    /// Replaces both the action bits and the info value.
    pub fn change_action_and_info(&self, action: u8, info: i32) {
        debug_assert_eq!(action & ActivityKind::CATEGORY_MASK, 0);
        if self.pushed {
            GlobalTracker::record_change(
                ActivityKind::generic(action),
                Some(ActivityData::Generic { id: self.id, info }),
            );
        }
    }
}

impl Drop for ScopedActivity {
    fn drop(&mut self) {
        if self.pushed {
            GlobalTracker::record_pop();
        }
    }
}

/// Records the run of a posted task for the duration of a scope.
#[derive(Debug)]
pub struct ScopedTaskRun {
    pushed: bool,
}

impl ScopedTaskRun {
    /// Pushes a task-run activity from the task's posting location and
    /// sequence number.
    #[must_use]
    pub fn new(posted_from: u64, sequence_id: u64) -> Self {
        let pushed = GlobalTracker::record_push(
            posted_from,
            ActivityKind::TASK_RUN,
            ActivityData::Task { sequence_id },
        );
        Self { pushed }
    }
}

impl Drop for ScopedTaskRun {
    fn drop(&mut self) {
        if self.pushed {
            GlobalTracker::record_pop();
        }
    }
}

/// Records a lock acquisition for the duration of a scope.
///
/// Thread-identity primitives may themselves acquire a lock, so this
/// category is allowed to re-enter the recording path; the owner-thread
/// assertion is bypassed for it.
#[derive(Debug)]
pub struct ScopedLockAcquire {
    pushed: bool,
}

impl ScopedLockAcquire {
    /// Pushes a lock-acquire activity for the lock at `lock_address`.
    #[must_use]
    pub fn new(lock_address: u64) -> Self {
        let pushed = GlobalTracker::record_push(
            0,
            ActivityKind::LOCK_ACQUIRE,
            ActivityData::Lock { lock_address },
        );
        Self { pushed }
    }
}

impl Drop for ScopedLockAcquire {
    fn drop(&mut self) {
        if self.pushed {
            GlobalTracker::record_pop();
        }
    }
}

/// Records an event wait for the duration of a scope.
#[derive(Debug)]
pub struct ScopedEventWait {
    pushed: bool,
}

impl ScopedEventWait {
    /// Pushes an event-wait activity for the event at `event_address`.
    #[must_use]
    pub fn new(event_address: u64) -> Self {
        let pushed = GlobalTracker::record_push(
            0,
            ActivityKind::EVENT_WAIT,
            ActivityData::Event { event_address },
        );
        Self { pushed }
    }
}

impl Drop for ScopedEventWait {
    fn drop(&mut self) {
        if self.pushed {
            GlobalTracker::record_pop();
        }
    }
}

/// Records a thread join for the duration of a scope.
#[derive(Debug)]
pub struct ScopedThreadJoin {
    pushed: bool,
}

impl ScopedThreadJoin {
    /// Pushes a thread-join activity for the target thread.
    #[must_use]
    pub fn new(thread_id: u64) -> Self {
        let pushed = GlobalTracker::record_push(
            0,
            ActivityKind::THREAD_JOIN,
            ActivityData::Thread { thread_id },
        );
        Self { pushed }
    }
}

impl Drop for ScopedThreadJoin {
    fn drop(&mut self) {
        if self.pushed {
            GlobalTracker::record_pop();
        }
    }
}

/// Records a wait on another process for the duration of a scope.
#[derive(Debug)]
pub struct ScopedProcessWait {
    pushed: bool,
}

impl ScopedProcessWait {
    /// Pushes a process-wait activity for the target pid.
    #[must_use]
    pub fn new(pid: u64) -> Self {
        let pushed = GlobalTracker::record_push(
            0,
            ActivityKind::PROCESS_WAIT,
            ActivityData::Process { pid },
        );
        Self { pushed }
    }
}

impl Drop for ScopedProcessWait {
    fn drop(&mut self) {
        if self.pushed {
            GlobalTracker::record_pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The lib test binary never installs a global tracker, so these
    // exercise the silent no-op path.
    #[test]
    fn wrappers_are_noops_without_global_tracker() {
        let activity = ScopedActivity::new(0x10, 2, 7, 0);
        activity.change_action(3);
        activity.change_info(9);
        activity.change_action_and_info(4, 10);
        drop(activity);

        drop(ScopedTaskRun::new(0x20, 1));
        drop(ScopedLockAcquire::new(0x30));
        drop(ScopedEventWait::new(0x40));
        drop(ScopedThreadJoin::new(5));
        drop(ScopedProcessWait::new(6));
    }
}

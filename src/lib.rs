//! Threadprobe: crash-survivable thread activity tracking over shared memory.
//!
//! # Overview
//!
//! Threadprobe records what every tracked thread in a process is currently
//! doing — running a task, acquiring a lock, waiting on an event, joining a
//! thread, waiting on a process, or a user-defined action — into a region of
//! memory that an external observer can read. The observer may be another
//! thread, another process mapping the same file, or a post-mortem tool
//! reading the file after the writing process has crashed.
//!
//! # Core Guarantees
//!
//! - **Wait-free recording**: `push`, `change`, and `pop` never block and
//!   never take a lock; per-operation cost is a handful of atomic stores
//! - **Crash survivability**: a file-backed segment retains the last
//!   recorded stack of every thread at the moment the process died
//! - **Torn-read detection**: readers snapshot concurrently with writers
//!   and detect interference through a tear-detection word, retrying a
//!   bounded number of times
//! - **Bounded memory**: per-thread regions are carved from one persistent
//!   segment and recycled through a lock-free free list as threads exit
//!
//! # Module Structure
//!
//! - [`activity`]: activity kinds, payloads, and snapshot records
//! - [`tracker`]: per-thread trackers, the process-wide manager, and the
//!   scoped RAII recording helpers
//! - [`persist`]: the persistent memory segment and its never-freeing
//!   allocator
//! - [`reader`]: external snapshot scanning over a segment
//! - [`metrics`]: counters and gauges for tracker lifecycle events
//! - [`error`]: construction-surface error types
//!
//! # Example
//!
//! ```ignore
//! use threadprobe::{GlobalTracker, ScopedTaskRun};
//!
//! GlobalTracker::create_with_local_memory(1 << 20, 1, "example", 32)?;
//!
//! {
//!     let _activity = ScopedTaskRun::new(0x1234, 42);
//!     // ... run the task; its frame is visible to observers ...
//! } // popped here
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod activity;
pub mod clock;
pub mod error;
pub mod metrics;
pub mod persist;
pub mod reader;
pub mod test_utils;
pub mod tracker;

pub use activity::{Activity, ActivityCategory, ActivityData, ActivityKind};
pub use error::TrackerError;
pub use metrics::TrackerMetrics;
pub use persist::{PersistentAllocator, Reference, Segment};
pub use reader::ActivityScanner;
pub use tracker::global::GlobalTracker;
pub use tracker::scoped::{
    ScopedActivity, ScopedEventWait, ScopedLockAcquire, ScopedProcessWait, ScopedTaskRun,
    ScopedThreadJoin,
};
pub use tracker::thread::{ActivitySnapshot, ThreadActivityTracker};

//! Error types for the construction surface.
//!
//! Hot-path operations (`push`, `change`, `pop`, `snapshot`) never fail
//! with an error: an unusable tracker degrades to a no-op and `snapshot`
//! reports plain success or failure. Typed errors exist only at the seams
//! where segments are created, files are mapped, and the process-wide
//! tracker is installed or torn down.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced when constructing segments, allocators, or the
/// process-wide tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Creating or opening the backing file failed.
    #[error("failed to open segment file {path}: {source}")]
    SegmentIo {
        /// Path of the backing file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Mapping the backing file or anonymous memory failed.
    #[error("failed to map segment memory: {0}")]
    SegmentMap(#[source] std::io::Error),

    /// The segment is too small for its header and at least one block.
    #[error("segment of {size} bytes is too small")]
    SegmentTooSmall {
        /// Requested segment size in bytes.
        size: usize,
    },

    /// An existing segment failed its header validation.
    #[error("segment header is not valid (bad cookie or truncated file)")]
    SegmentCorrupt,

    /// The allocator handed to `create_with_allocator` already holds
    /// records.
    #[error("allocator already contains records")]
    AllocatorNotEmpty,

    /// A process-wide tracker is already installed.
    #[error("a global tracker already exists")]
    AlreadyExists,

    /// Teardown was requested while per-thread trackers are still live.
    #[error("{live} thread tracker(s) still live")]
    TrackersStillLive {
        /// Number of live per-thread trackers.
        live: u32,
    },

    /// Teardown was requested but no tracker is installed.
    #[error("no global tracker is installed")]
    NotInstalled,
}

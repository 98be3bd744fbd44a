//! Persistent memory: segments and the never-freeing allocator.
//!
//! A [`Segment`] is a contiguous byte range shared with observers — an
//! anonymous mapping for in-process use, or a memory-mapped file that
//! outlives the process. The [`PersistentAllocator`] carves blocks out of
//! a segment; blocks are never freed, only re-typed and recycled by the
//! caller. Allocator metadata lives inside the segment itself, so a
//! reader in another process (or a post-mortem tool) can rediscover every
//! block by iterating.

mod allocator;
mod segment;

pub use allocator::{AllocatorIter, PersistentAllocator, Reference};
pub use segment::Segment;

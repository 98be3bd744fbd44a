//! Shared memory segments backing the persistent allocator.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};

use crate::error::TrackerError;

/// A contiguous, writable memory range shared with observers.
///
/// Anonymous segments live only as long as the process; file-backed
/// segments persist on disk and can be re-opened after the writing
/// process has exited (cleanly or not). Fresh segments are zero-filled
/// by the operating system.
#[derive(Debug)]
pub struct Segment {
    mmap: MmapMut,
    base: *mut u8,
    len: usize,
}

// SAFETY: the mapped memory is deliberately shared between threads and
// processes; every concurrent access goes through atomic operations on
// fixed-layout fields. The raw base pointer stays valid for the lifetime
// of the mapping, which `Segment` owns.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Creates an anonymous zero-filled segment of `size` bytes.
    pub fn anonymous(size: usize) -> Result<Self, TrackerError> {
        let mut mmap = MmapOptions::new()
            .len(size)
            .map_anon()
            .map_err(TrackerError::SegmentMap)?;
        let base = mmap.as_mut_ptr();
        Ok(Self {
            mmap,
            base,
            len: size,
        })
    }

    /// Creates (or truncates) a file of `size` bytes and maps it writable.
    pub fn create_file(path: &Path, size: usize) -> Result<Self, TrackerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| TrackerError::SegmentIo {
                path: path.to_path_buf(),
                source,
            })?;
        file.set_len(size as u64)
            .map_err(|source| TrackerError::SegmentIo {
                path: path.to_path_buf(),
                source,
            })?;
        // SAFETY: the file was just created with the mapped length and is
        // only resized through this mapping.
        let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file) }
            .map_err(TrackerError::SegmentMap)?;
        let base = mmap.as_mut_ptr();
        Ok(Self {
            mmap,
            base,
            len: size,
        })
    }

    /// Maps an existing segment file writable.
    ///
    /// The snapshot protocol writes the tear-detection word even when only
    /// reading, so post-mortem scanning also uses a writable mapping.
    pub fn open_file(path: &Path) -> Result<Self, TrackerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| TrackerError::SegmentIo {
                path: path.to_path_buf(),
                source,
            })?;
        let len = file
            .metadata()
            .map_err(|source| TrackerError::SegmentIo {
                path: path.to_path_buf(),
                source,
            })?
            .len() as usize;
        // SAFETY: mapped at the file's current length; the file is never
        // truncated while mapped.
        let mut mmap = unsafe { MmapOptions::new().len(len).map_mut(&file) }
            .map_err(TrackerError::SegmentMap)?;
        let base = mmap.as_mut_ptr();
        Ok(Self { mmap, base, len })
    }

    /// Returns the segment length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the segment has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the base address of the mapping.
    #[must_use]
    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }

    /// Flushes a file-backed segment to disk; a no-op for anonymous maps.
    pub fn flush(&self) -> Result<(), TrackerError> {
        self.mmap.flush().map_err(TrackerError::SegmentMap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_segment_is_zeroed() {
        let segment = Segment::anonymous(4096).expect("map anon");
        assert_eq!(segment.len(), 4096);
        // SAFETY: freshly mapped, no other accessors.
        let bytes = unsafe { std::slice::from_raw_parts(segment.base(), segment.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn file_segment_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("segment.bin");

        let segment = Segment::create_file(&path, 8192).expect("create");
        // SAFETY: exclusive access in this test.
        unsafe { segment.base().write(0xAB) };
        segment.flush().expect("flush");
        drop(segment);

        let reopened = Segment::open_file(&path).expect("open");
        assert_eq!(reopened.len(), 8192);
        // SAFETY: exclusive access in this test.
        assert_eq!(unsafe { reopened.base().read() }, 0xAB);
    }
}

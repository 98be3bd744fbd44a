//! Time sources for activity timestamps.
//!
//! Activities are stamped with monotonic ticks so they are immune to wall
//! clock adjustments; a region's header records the (`wall`, `ticks`) pair
//! at initialization and snapshots rebase stored ticks onto wall time with
//! `wall_origin + (ticks - ticks_origin)`. Both sources use microseconds.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Anchor for the process-local monotonic tick count.
static TICK_ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Wall-clock microseconds since the Unix epoch.
///
/// Clamped to be non-zero so an initialized header is distinguishable
/// from zeroed memory.
#[must_use]
pub fn wall_time_micros() -> i64 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(1);
    micros.max(1)
}

/// Monotonic microseconds since an arbitrary process-local anchor.
///
/// Values are strictly positive; only differences are meaningful, and only
/// within the process that produced them.
#[must_use]
pub fn ticks_micros() -> i64 {
    let anchor = TICK_ANCHOR.get_or_init(Instant::now);
    (anchor.elapsed().as_micros() as i64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_time_is_nonzero() {
        assert!(wall_time_micros() > 0);
    }

    #[test]
    fn ticks_are_nonzero_and_monotonic() {
        let a = ticks_micros();
        let b = ticks_micros();
        assert!(a > 0);
        assert!(b >= a);
    }
}

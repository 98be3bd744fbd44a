//! Shared helpers for unit and integration tests.
//!
//! - Consistent tracing-based logging initialization
//! - A process-wide guard serializing tests that install the global
//!   tracker singleton

use parking_lot::{Mutex, MutexGuard};
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();
static GLOBAL_GUARD: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the guard serializing tests that install, use, and destroy
/// the process-wide tracker. There is one singleton per process; tests
/// touching it must not interleave.
pub fn global_guard() -> MutexGuard<'static, ()> {
    GLOBAL_GUARD.lock()
}

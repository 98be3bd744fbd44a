//! Tracker lifecycle metrics.
//!
//! Counters and gauges covering the events that matter operationally:
//! how many trackers are live, how regions were obtained, and what was
//! dropped. Nothing here is touched on the push/change/pop hot path.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the counter name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A gauge that can go up and down.
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicI64::new(0),
        }
    }

    /// Increments the gauge by 1.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the gauge by 1.
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the gauge name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Instruments owned by the process-wide tracker.
#[derive(Debug)]
pub struct TrackerMetrics {
    /// Per-thread trackers currently live.
    pub thread_trackers: Gauge,
    /// Trackers created over the process lifetime.
    pub trackers_created: Counter,
    /// Regions obtained by recycling a previously released one.
    pub regions_recycled: Counter,
    /// Regions served from transient heap memory because the persistent
    /// allocator was exhausted.
    pub heap_fallbacks: Counter,
    /// Region returns dropped because the recycle list was full.
    pub returns_dropped: Counter,
}

impl TrackerMetrics {
    pub(crate) const fn new() -> Self {
        Self {
            thread_trackers: Gauge::new("tracker.threads.live"),
            trackers_created: Counter::new("tracker.threads.created"),
            regions_recycled: Counter::new("tracker.regions.recycled"),
            heap_fallbacks: Counter::new("tracker.regions.heap_fallback"),
            returns_dropped: Counter::new("tracker.regions.returns_dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let counter = Counter::new("test.counter");
        counter.increment();
        counter.add(4);
        assert_eq!(counter.get(), 5);
        assert_eq!(counter.name(), "test.counter");
    }

    #[test]
    fn gauge_moves_both_ways() {
        let gauge = Gauge::new("test.gauge");
        gauge.increment();
        gauge.increment();
        gauge.decrement();
        assert_eq!(gauge.get(), 1);
    }
}

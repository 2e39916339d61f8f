//! Per-segment operation counters and read latency percentiles.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;

use crate::bloom::BloomStats;

/// Highest latency the histogram tracks, in microseconds (one minute).
const MAX_TRACKED_LATENCY_US: u64 = 60_000_000;

/// Point-in-time copy of a segment's metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub delta_cache_hits: u64,
    pub delta_cache_misses: u64,
    /// Delta cache entries dropped by compaction.
    pub delta_cache_evictions: u64,
    pub flushes: u64,
    pub compactions: u64,
    pub delta_cache_size: u64,
    pub bloom: BloomStats,
    pub get_latency_p50_us: u64,
    pub get_latency_p90_us: u64,
    pub get_latency_p99_us: u64,
}

pub(crate) struct SegmentMetrics {
    pub gets: AtomicU64,
    pub puts: AtomicU64,
    pub deletes: AtomicU64,
    pub delta_cache_hits: AtomicU64,
    pub delta_cache_misses: AtomicU64,
    pub delta_cache_evictions: AtomicU64,
    pub flushes: AtomicU64,
    pub compactions: AtomicU64,
    /// `None` if the histogram could not be allocated; latencies are then not tracked.
    get_latency: Mutex<Option<Histogram<u64>>>,
}

impl SegmentMetrics {
    pub fn new(flushes: u64, compactions: u64) -> Self {
        Self {
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            delta_cache_hits: AtomicU64::new(0),
            delta_cache_misses: AtomicU64::new(0),
            delta_cache_evictions: AtomicU64::new(0),
            flushes: AtomicU64::new(flushes),
            compactions: AtomicU64::new(compactions),
            get_latency: Mutex::new(Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_US, 2).ok()),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_latency(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros())
            .unwrap_or(u64::MAX)
            .clamp(1, MAX_TRACKED_LATENCY_US);
        if let Ok(mut guard) = self.get_latency.lock() {
            if let Some(hist) = guard.as_mut() {
                let _ = hist.record(us);
            }
        }
    }

    pub fn snapshot(&self, bloom: BloomStats, delta_cache_size: u64) -> MetricsSnapshot {
        let (p50, p90, p99) = match self.get_latency.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(hist) if !hist.is_empty() => (
                    hist.value_at_percentile(50.0),
                    hist.value_at_percentile(90.0),
                    hist.value_at_percentile(99.0),
                ),
                _ => (0, 0, 0),
            },
            Err(_) => (0, 0, 0),
        };
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            gets: load(&self.gets),
            puts: load(&self.puts),
            deletes: load(&self.deletes),
            delta_cache_hits: load(&self.delta_cache_hits),
            delta_cache_misses: load(&self.delta_cache_misses),
            delta_cache_evictions: load(&self.delta_cache_evictions),
            flushes: load(&self.flushes),
            compactions: load(&self.compactions),
            delta_cache_size,
            bloom,
            get_latency_p50_us: p50,
            get_latency_p90_us: p90,
            get_latency_p99_us: p99,
        }
    }
}

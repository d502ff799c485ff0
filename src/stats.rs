//! Observable counters, exposed continuously per spec.md §7, backing
//! `Supervisor::snapshot_stats()`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    pub packets_received: AtomicU64,
    pub packets_lost: AtomicU64,
    pub codec_errors: AtomicU64,
    pub ring_overwrites: AtomicU64,
    pub dropped_input: AtomicU64,
    pub writer_dropped: AtomicU64,
    pub bytes_written: AtomicU64,
    pub rotation_count: AtomicU64,
    pub samples_written: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            codec_errors: self.codec_errors.load(Ordering::Relaxed),
            ring_overwrites: self.ring_overwrites.load(Ordering::Relaxed),
            dropped_input: self.dropped_input.load(Ordering::Relaxed),
            writer_dropped: self.writer_dropped.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            rotation_count: self.rotation_count.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// A consistent-enough-for-display point-in-time read of all counters.
/// Individual fields are read with relaxed ordering and independently, so
/// this is a snapshot of convenience, not a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub codec_errors: u64,
    pub ring_overwrites: u64,
    pub dropped_input: u64,
    pub writer_dropped: u64,
    pub bytes_written: u64,
    pub rotation_count: u64,
    pub samples_written: u64,
}

impl StatsSnapshot {
    /// Samples/second over `elapsed_secs` since stream start (0 if not positive).
    pub fn samples_per_second(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs > 0.0 {
            self.packets_received as f64 / elapsed_secs
        } else {
            0.0
        }
    }

    /// Buffer fill percentage given the raw ring's current length and capacity.
    pub fn buffer_fill_pct(ring_len: usize, ring_capacity: usize) -> f64 {
        if ring_capacity == 0 {
            0.0
        } else {
            100.0 * ring_len as f64 / ring_capacity as f64
        }
    }
}

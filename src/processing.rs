//! Processing stage (spec.md §4.4): soft-zero subtraction, counts→SI
//! conversion, optional IIR filtering, and deterministic fan-out to the
//! visualization buffer and the writer queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::filter::ChannelFilter;
use crate::ring::RawRing;
use crate::sample::{CalibrationInfo, SampleRecord};
use crate::stats::Counters;
use crate::viz::VizBuffer;
use crate::writer::FileWriter;

/// Holds the currently-attached recording writer, if any. Swapped by the
/// supervisor's `start_recording`/`stop_recording` independently of the
/// connection lifecycle (spec.md §6).
pub type WriterSlot = Arc<ArcSwapOption<FileWriter>>;

/// Filter configuration the processing task polls via an atomic snapshot,
/// written only by the supervisor while not Streaming (spec.md §5).
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    pub enabled: bool,
    pub cutoff_hz: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { enabled: false, cutoff_hz: 20.0 }
    }
}

/// Shared, lock-free fields the processing task reads every sample without
/// taking a lock, by the state-machine convention of spec.md §5 that writes
/// only happen while the stream is paused or not yet started.
#[derive(Clone)]
pub struct ProcessingShared {
    pub soft_zero: Arc<ArcSwap<[i32; 6]>>,
    pub calibration: Arc<ArcSwap<CalibrationInfo>>,
    pub filter_config: Arc<ArcSwap<FilterConfig>>,
}

impl ProcessingShared {
    pub fn new(calibration: CalibrationInfo) -> Self {
        Self {
            soft_zero: Arc::new(ArcSwap::from_pointee([0i32; 6])),
            calibration: Arc::new(ArcSwap::from_pointee(calibration)),
            filter_config: Arc::new(ArcSwap::from_pointee(FilterConfig::default())),
        }
    }

    /// Soft-zero bias: snapshots `counts` as the new offsets (spec.md §4.7).
    pub fn apply_soft_bias(&self, counts: [i32; 6]) {
        self.soft_zero.store(Arc::new(counts));
    }
}

const SAMPLE_RATE_HZ: f64 = 1000.0;
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Runs the processing stage until `stop` is set and the ring has been
/// drained. Intended to be driven inside a `tokio::spawn`.
pub async fn run(
    ring: Arc<RawRing>,
    viz: Arc<VizBuffer>,
    writer_slot: WriterSlot,
    shared: ProcessingShared,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
) {
    let mut cursor = 0u64;
    let mut filter = ChannelFilter::new(shared.filter_config.load().cutoff_hz, SAMPLE_RATE_HZ);
    let mut filter_was_enabled = shared.filter_config.load().enabled;
    filter.reset();

    loop {
        let cfg = **shared.filter_config.load();
        if cfg.enabled != filter_was_enabled {
            filter.reset();
            filter_was_enabled = cfg.enabled;
        }

        let batch = ring.drain_new(&mut cursor);
        for raw in batch {
            process_one(raw, &shared, &mut filter, &viz, &writer_slot, &counters);
        }

        if stop.load(Ordering::SeqCst) {
            // One more pass to flush anything pushed between the last drain
            // and the receiver's own shutdown.
            let tail = ring.drain_new(&mut cursor);
            for raw in tail {
                process_one(raw, &shared, &mut filter, &viz, &writer_slot, &counters);
            }
            break;
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn process_one(
    mut sample: SampleRecord,
    shared: &ProcessingShared,
    filter: &mut ChannelFilter,
    viz: &VizBuffer,
    writer_slot: &WriterSlot,
    counters: &Counters,
) {
    let offsets = shared.soft_zero.load();
    let cal = shared.calibration.load();
    let cfg = shared.filter_config.load();

    let mut counts = sample.counts;
    for i in 0..6 {
        counts[i] -= offsets[i];
    }

    let mut force_n = [0.0; 3];
    let mut torque_nm = [0.0; 3];
    for i in 0..3 {
        force_n[i] = counts[i] as f64 / cal.cpf;
        torque_nm[i] = counts[i + 3] as f64 / cal.cpt;
    }

    let mut values = [force_n[0], force_n[1], force_n[2], torque_nm[0], torque_nm[1], torque_nm[2]];
    if cfg.enabled {
        values = filter.process(&values);
        force_n = [values[0], values[1], values[2]];
        torque_nm = [values[3], values[4], values[5]];
    }

    sample.force_n = Some(force_n);
    sample.torque_nm = Some(torque_nm);

    // Deterministic fan-out: visualization first (cannot fail), then the
    // writer queue, only while a recording is attached (spec.md §4.4, §6).
    viz.push(sample.t_mono_ns, &values);

    if let Some(writer) = writer_slot.load_full() {
        if !writer.enqueue(sample) {
            Counters::inc(&counters.dropped_input);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_bias_snapshot_zeros_subsequent_identical_samples() {
        let shared = ProcessingShared::new(CalibrationInfo::new(1_000_000.0, 1_000_000.0).unwrap());
        let counts = [100, 200, 300, 10, 20, 30];
        shared.apply_soft_bias(counts);

        let mut filter = ChannelFilter::new(20.0, SAMPLE_RATE_HZ);
        let offsets = shared.soft_zero.load();
        let cal = shared.calibration.load();
        let mut adjusted = counts;
        for i in 0..6 {
            adjusted[i] -= offsets[i];
        }
        let mut force_n = [0.0; 3];
        let mut torque_nm = [0.0; 3];
        for i in 0..3 {
            force_n[i] = adjusted[i] as f64 / cal.cpf;
            torque_nm[i] = adjusted[i + 3] as f64 / cal.cpt;
        }
        let _ = &mut filter; // filter untouched in this scenario (disabled by default)
        assert_eq!(force_n, [0.0, 0.0, 0.0]);
        assert_eq!(torque_nm, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn conversion_matches_counts_over_cpf_within_ulp() {
        let cal = CalibrationInfo::new(1_000_000.0, 1_000_000.0).unwrap();
        let counts: [i32; 6] = [1000, -1000, 5000, 100, -100, 50];
        for i in 0..3 {
            let force = counts[i] as f64 / cal.cpf;
            let expected = counts[i] as f64 / 1_000_000.0;
            assert!((force - expected).abs() <= f64::EPSILON);
        }
    }
}

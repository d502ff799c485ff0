//! End-to-end scenarios S1-S6 (spec.md §8), driven against the real
//! receiver/processing/writer/viz/calibration modules over loopback
//! simulators rather than mocks.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;

use netrs_daq::calibration::CalibrationResolver;
use netrs_daq::config::{ForceUnit, TorqueUnit};
use netrs_daq::processing::{self, ProcessingShared};
use netrs_daq::receiver;
use netrs_daq::ring::RawRing;
use netrs_daq::sample::CalibrationInfo;
use netrs_daq::sim::{HttpSimBehavior, HttpSimulator, TcpSimulator, UdpSimulator};
use netrs_daq::stats::Counters;
use netrs_daq::viz::{TierId, VizBuffer};
use netrs_daq::writer::format::SessionMeta;
use netrs_daq::writer::{FileWriter, WriterConfig};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn wait_until(cond: impl Fn() -> bool, timeout: Duration) {
    let start = tokio::time::Instant::now();
    while !cond() {
        if start.elapsed() > timeout {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn session_meta(cpf: f64, cpt: f64) -> SessionMeta {
    SessionMeta {
        serial: None,
        firmware: None,
        cpf,
        cpt,
        session_start: Utc::now(),
        force_unit: ForceUnit::N,
        torque_unit: TorqueUnit::Nm,
        filter_enabled: false,
        filter_cutoff_hz: 20.0,
    }
}

/// Drives one UDP simulator through the real receiver + processing pipeline
/// until `packets_received >= expect_received`, optionally attaching a
/// writer, then stops both tasks. Returns the shared counters.
#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    sim_addr: std::net::SocketAddr,
    cal: CalibrationInfo,
    writer: Option<FileWriter>,
    viz: Arc<VizBuffer>,
    ring_capacity: usize,
    expect_received: u64,
    timeout: Duration,
) -> (Arc<Counters>, Option<FileWriter>) {
    let ring = Arc::new(RawRing::new(ring_capacity));
    let counters = Arc::new(Counters::default());
    let writer_slot = Arc::new(ArcSwapOption::empty());
    if let Some(w) = writer {
        writer_slot.store(Some(Arc::new(w)));
    }
    let shared = ProcessingShared::new(cal);

    let receiver_stop = Arc::new(AtomicBool::new(false));
    let processing_stop = Arc::new(AtomicBool::new(false));

    let recv_task = tokio::spawn(receiver::run(
        sim_addr.ip(),
        sim_addr.port(),
        1,
        ring.clone(),
        counters.clone(),
        receiver_stop.clone(),
    ));
    let proc_task = tokio::spawn(processing::run(
        ring.clone(),
        viz.clone(),
        writer_slot.clone(),
        shared,
        counters.clone(),
        processing_stop.clone(),
    ));

    wait_until(|| counters.packets_received.load(Ordering::Relaxed) >= expect_received, timeout).await;

    receiver_stop.store(true, Ordering::SeqCst);
    processing_stop.store(true, Ordering::SeqCst);
    let _ = tokio::time::timeout(Duration::from_secs(2), recv_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), proc_task).await;

    let writer = writer_slot.swap(None).and_then(|w| Arc::try_unwrap(w).ok());
    (counters, writer)
}

#[tokio::test]
async fn s1_loopback_stream_converts_every_sample_with_zero_loss() {
    let sequences: Vec<u32> = (1..=10_000).collect();
    let counts = [1000, -1000, 5000, 100, -100, 50];
    let sim = UdpSimulator::spawn(sequences, counts).await;

    let dir = tempfile::tempdir().unwrap();
    let counters_for_writer = Arc::new(Counters::default());
    let writer = FileWriter::spawn(
        WriterConfig {
            output_directory: dir.path().to_path_buf(),
            filename_prefix: "s1".into(),
            ..Default::default()
        },
        session_meta(1_000_000.0, 1_000_000.0),
        20_000,
        counters_for_writer,
    )
    .await
    .unwrap();

    let viz = Arc::new(VizBuffer::new());
    let (counters, writer) = run_pipeline(
        sim.addr,
        CalibrationInfo::new(1_000_000.0, 1_000_000.0).unwrap(),
        Some(writer),
        viz,
        60_000,
        10_000,
        Duration::from_secs(15),
    )
    .await;
    sim.stop();
    writer.unwrap().stop().await.unwrap();

    assert_eq!(counters.packets_lost.load(Ordering::Relaxed), 0);
    assert_eq!(counters.packets_received.load(Ordering::Relaxed), 10_000);

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let content = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
    let data_lines: Vec<&str> =
        content.lines().filter(|l| !l.starts_with('#') && !l.starts_with("timestamp_utc")).collect();
    assert_eq!(data_lines.len(), 10_000);

    for line in &data_lines {
        let fields: Vec<&str> = line.split(',').collect();
        let fx: f64 = fields[5].parse().unwrap();
        let fy: f64 = fields[6].parse().unwrap();
        let fz: f64 = fields[7].parse().unwrap();
        let tx: f64 = fields[8].parse().unwrap();
        let ty: f64 = fields[9].parse().unwrap();
        let tz: f64 = fields[10].parse().unwrap();
        assert!((fx - 0.001).abs() < 1e-9);
        assert!((fy - (-0.001)).abs() < 1e-9);
        assert!((fz - 0.005).abs() < 1e-9);
        assert!((tx - 0.0001).abs() < 1e-9);
        assert!((ty - (-0.0001)).abs() < 1e-9);
        assert!((tz - 0.00005).abs() < 1e-9);
    }
}

#[tokio::test]
async fn s2_gap_detection_counts_three_lost_of_five_received() {
    let sim = UdpSimulator::spawn(vec![1, 2, 3, 7, 8], [0; 6]).await;
    let viz = Arc::new(VizBuffer::new());
    let (counters, _) = run_pipeline(
        sim.addr,
        CalibrationInfo::new(1_000_000.0, 1_000_000.0).unwrap(),
        None,
        viz,
        1_000,
        5,
        Duration::from_secs(5),
    )
    .await;
    sim.stop();

    assert_eq!(counters.packets_received.load(Ordering::Relaxed), 5);
    assert_eq!(counters.packets_lost.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn s3_rotation_by_size_produces_multiple_parts_totaling_200_rows() {
    let sequences: Vec<u32> = (1..=200).collect();
    let sim = UdpSimulator::spawn_paced(sequences, [1000, -1000, 5000, 100, -100, 50], Duration::from_millis(1)).await;

    let dir = tempfile::tempdir().unwrap();
    let counters_for_writer = Arc::new(Counters::default());
    let writer = FileWriter::spawn(
        WriterConfig {
            output_directory: dir.path().to_path_buf(),
            filename_prefix: "s3".into(),
            rotation_enabled: true,
            rotation_size_bytes: 1024,
            flush_interval: Duration::from_millis(10),
            ..Default::default()
        },
        session_meta(1_000_000.0, 1_000_000.0),
        1_000,
        counters_for_writer,
    )
    .await
    .unwrap();

    let viz = Arc::new(VizBuffer::new());
    let (_, writer) = run_pipeline(
        sim.addr,
        CalibrationInfo::new(1_000_000.0, 1_000_000.0).unwrap(),
        Some(writer),
        viz,
        1_000,
        200,
        Duration::from_secs(10),
    )
    .await;
    sim.stop();
    writer.unwrap().stop().await.unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(entries.len() >= 2, "expected rotation to produce multiple parts, got {}", entries.len());

    let mut total_rows = 0usize;
    for entry in &entries {
        let content = std::fs::read_to_string(entry.as_ref().unwrap().path()).unwrap();
        assert!(content.contains("# serial:"));
        assert!(content.contains("timestamp_utc"));
        total_rows += content.lines().filter(|l| !l.starts_with('#') && !l.starts_with("timestamp_utc")).count();
    }
    assert_eq!(total_rows, 200);
}

#[tokio::test]
async fn s4_soft_bias_zeros_subsequent_identical_sample() {
    let counts = [100, 200, 300, 10, 20, 30];
    let shared = ProcessingShared::new(CalibrationInfo::new(1_000_000.0, 1_000_000.0).unwrap());
    let writer_slot: processing::WriterSlot = Arc::new(ArcSwapOption::empty());
    let counters = Arc::new(Counters::default());
    let stop = Arc::new(AtomicBool::new(true));

    // First sample observed pre-bias; its only role is to supply the raw
    // counts snapshotted as the new soft-zero offsets (spec.md §4.7).
    let pre_bias_ring = Arc::new(RawRing::new(10));
    pre_bias_ring.push(netrs_daq::sample::SampleRecord::new(0, 1, 1, 0, counts));
    let scratch_viz = Arc::new(VizBuffer::new());
    processing::run(
        pre_bias_ring,
        scratch_viz,
        writer_slot.clone(),
        shared.clone(),
        counters.clone(),
        stop.clone(),
    )
    .await;
    shared.apply_soft_bias(counts);

    // One more identical sample, now measured against the fresh offsets.
    let post_bias_ring = Arc::new(RawRing::new(10));
    post_bias_ring.push(netrs_daq::sample::SampleRecord::new(1, 2, 2, 0, counts));
    let viz = Arc::new(VizBuffer::new());
    processing::run(post_bias_ring, viz.clone(), writer_slot, shared, counters, stop).await;

    let series = viz.get_series(3600, 10_000);
    let last = series.buckets.last().expect("at least one bucket recorded");
    for channel in 0..6 {
        assert_eq!(last.min[channel], 0.0);
        assert_eq!(last.max[channel], 0.0);
    }
}

#[tokio::test]
async fn s5_calibration_falls_back_to_tcp_after_http_500() {
    let http = HttpSimulator::spawn(HttpSimBehavior::Fail500).await;
    let tcp = TcpSimulator::spawn(500_000, 800_000).await;

    let resolver = CalibrationResolver::new();
    let info = resolver
        .resolve(LOCALHOST, http.addr.port(), tcp.addr.port(), Duration::from_secs(2))
        .await
        .expect("TCP fallback should succeed after the HTTP 500");

    assert_eq!(info.cpf, 500_000.0);
    assert_eq!(info.cpt, 800_000.0);

    http.stop();
    tcp.stop();
}

#[tokio::test]
async fn s6_tier_selection_picks_t1_for_one_hour_window_at_10000_budget() {
    let viz = VizBuffer::new();
    for i in 0..100u64 {
        viz.push(i * 1_000_000_000, &[i as f64; 6]); // one sample per second
    }
    let series = viz.get_series(3600, 10_000);
    assert_eq!(series.tier, TierId::T1);
    assert!(series.buckets.len() <= 10_000);
}

//! UDP receiver (spec.md §4.2): a single-threaded, non-blocking datagram
//! loop that owns the socket, decodes frames, stamps reception time, and
//! pushes into the raw ring without ever blocking on a downstream consumer.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::error::{DaqError, DaqResult, NetError, RecoveryAction};
use crate::ring::RawRing;
use crate::sample::SampleRecord;
use crate::stats::Counters;
use crate::wire::request::{encode_request, RdtCommand};
use crate::wire::response::decode_response;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Tracks `rdt_sequence` gaps with wraparound-safe arithmetic (spec.md §8).
#[derive(Debug, Default)]
struct SequenceTracker {
    last: Option<u32>,
}

impl SequenceTracker {
    /// Returns the number of missed sequence numbers implied by `seq`
    /// following the last observed one (0 on the first sample, or on any
    /// non-forward sequence, which is treated as a stream restart rather
    /// than loss).
    fn observe(&mut self, seq: u32) -> u64 {
        let lost = match self.last {
            None => 0,
            Some(last) => {
                let delta = seq.wrapping_sub(last);
                if delta == 0 || delta > u32::MAX / 2 {
                    0 // duplicate or out-of-order/restart, not a forward gap
                } else {
                    (delta - 1) as u64
                }
            }
        };
        self.last = Some(seq);
        lost
    }
}

/// Runs the UDP receive loop until `stop` is set. Intended to be driven
/// inside a `tokio::spawn`; returns once the socket is idle and `stop` holds.
pub async fn run(
    endpoint: IpAddr,
    udp_port: u16,
    decimation_factor: u32,
    ring: Arc<RawRing>,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
) -> DaqResult<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| DaqError::net("NET-003", RecoveryAction::Retry, NetError::Socket(e.to_string())))?;
    socket
        .connect((endpoint, udp_port))
        .await
        .map_err(|e| DaqError::net("NET-001", RecoveryAction::Reconnect, NetError::ConnectRefused { addr: e.to_string() }))?;

    let start_request = encode_request(RdtCommand::StartInfinite, 0);
    socket
        .send(&start_request)
        .await
        .map_err(|e| DaqError::net("NET-003", RecoveryAction::Retry, NetError::Socket(e.to_string())))?;
    debug!(target: "receiver", %endpoint, udp_port, "sent start-infinite request");

    let decimation_factor = decimation_factor.max(1);
    let mut decimation_counter: u32 = 0;
    let mut tracker = SequenceTracker::default();
    let epoch = Instant::now();
    let mut buf = [0u8; 512];

    loop {
        match tokio::time::timeout(RECV_TIMEOUT, socket.recv(&mut buf)).await {
            Err(_) => {
                // Timed out with no datagram; this is the cooperative
                // cancellation point (spec.md §5).
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            Ok(Err(e)) => {
                warn!(target: "receiver", "socket recv error: {e}");
                Counters::inc(&counters.codec_errors);
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            Ok(Ok(n)) => {
                let decoded = match decode_response(&buf[..n]) {
                    Ok(d) => d,
                    Err(_) => {
                        Counters::inc(&counters.codec_errors);
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        continue;
                    }
                };

                let lost = tracker.observe(decoded.rdt_sequence);
                Counters::add(&counters.packets_lost, lost);
                Counters::inc(&counters.packets_received);

                decimation_counter = decimation_counter.wrapping_add(1);
                if decimation_counter % decimation_factor == 0 {
                    let t_mono_ns = epoch.elapsed().as_nanos() as u64;
                    let sample = SampleRecord::new(
                        t_mono_ns,
                        decoded.rdt_sequence,
                        decoded.ft_sequence,
                        decoded.status,
                        decoded.counts,
                    );
                    let was_full = ring.len() == ring.capacity();
                    ring.push(sample);
                    if was_full {
                        Counters::inc(&counters.ring_overwrites);
                    }
                }

                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    let stop_request = encode_request(RdtCommand::Stop, 0);
    let _ = socket.send(&stop_request).await;
    debug!(target: "receiver", "receive loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_reports_zero_loss_for_contiguous_sequence() {
        let mut tracker = SequenceTracker::default();
        let mut total_lost = 0u64;
        for seq in 1..=10u32 {
            total_lost += tracker.observe(seq);
        }
        assert_eq!(total_lost, 0);
    }

    #[test]
    fn tracker_counts_gap_of_three_for_1_2_3_7_8() {
        let mut tracker = SequenceTracker::default();
        let mut total_lost = 0u64;
        for seq in [1u32, 2, 3, 7, 8] {
            total_lost += tracker.observe(seq);
        }
        assert_eq!(total_lost, 3);
    }

    #[test]
    fn tracker_treats_backward_jump_as_restart_not_loss() {
        let mut tracker = SequenceTracker::default();
        tracker.observe(1000);
        let lost = tracker.observe(1);
        assert_eq!(lost, 0);
    }

    #[test]
    fn tracker_ignores_duplicate_sequence() {
        let mut tracker = SequenceTracker::default();
        tracker.observe(5);
        let lost = tracker.observe(5);
        assert_eq!(lost, 0);
    }
}

//! Supervisor (spec.md §2, §4.8, §6): lifecycle state machine plus the public
//! operations surface invoked by the GUI/CLI collaborators.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use parking_lot::Mutex;
use smlang::statemachine;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::calibration::CalibrationResolver;
use crate::command::CommandChannel;
use crate::config::{BiasMode, LogFormat, Preferences};
use crate::error::{DaqError, DaqResult};
use crate::processing::{self, FilterConfig, ProcessingShared, WriterSlot};
use crate::receiver;
use crate::ring::RawRing;
use crate::sample::CalibrationInfo;
use crate::stats::{Counters, StatsSnapshot};
use crate::viz::{Series, VizBuffer};
use crate::writer::format::SessionMeta;
use crate::writer::{FileWriter, WriterConfig};

const MAX_CONNECT_RETRIES: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

statemachine! {
    name: Supervisor,
    derive_states: [Debug, Clone, Copy],
    derive_events: [Debug, Clone, Copy],
    transitions: {
        *Disconnected + Connect / log_connecting = Connecting,

        Connecting + Connected / log_calibrating = Calibrating,
        Connecting + ConnectFailed [should_retry] / log_recoverable = ErrorRecoverable,
        Connecting + ConnectFailed [!should_retry] / log_fatal = ErrorFatal,

        Calibrating + Calibrated / log_streaming = Streaming,
        Calibrating + CalibrationFailed [should_retry] / log_recoverable = ErrorRecoverable,
        Calibrating + CalibrationFailed [!should_retry] / log_fatal = ErrorFatal,

        Streaming + Stop / log_disconnected = Disconnected,
        Streaming + NetworkError [should_retry] / log_recoverable = ErrorRecoverable,
        Streaming + NetworkError [!should_retry] / log_fatal = ErrorFatal,

        // A retry (automatic or user-initiated) re-enters Connecting exactly
        // like a fresh connect(); whether it lands back in ErrorRecoverable
        // or escalates to ErrorFatal is decided by `should_retry` the next
        // time a failure event fires.
        ErrorRecoverable + Connect / log_connecting = Connecting,
        ErrorFatal + Connect / log_connecting = Connecting,
    },
}

struct Ctx {
    retry_count: Arc<AtomicU32>,
}

impl SupervisorStateMachineContext for Ctx {
    fn should_retry(&self) -> Result<bool, ()> {
        Ok(self.retry_count.load(Ordering::SeqCst) < MAX_CONNECT_RETRIES)
    }

    fn log_connecting(&mut self) -> Result<(), ()> {
        info!(target: "supervisor", "-> Connecting");
        Ok(())
    }
    fn log_calibrating(&mut self) -> Result<(), ()> {
        info!(target: "supervisor", "-> Calibrating");
        Ok(())
    }
    fn log_streaming(&mut self) -> Result<(), ()> {
        info!(target: "supervisor", "-> Streaming");
        Ok(())
    }
    fn log_disconnected(&mut self) -> Result<(), ()> {
        info!(target: "supervisor", "-> Disconnected");
        Ok(())
    }
    fn log_recoverable(&mut self) -> Result<(), ()> {
        warn!(target: "supervisor", "-> ErrorRecoverable");
        Ok(())
    }
    fn log_fatal(&mut self) -> Result<(), ()> {
        error!(target: "supervisor", "-> ErrorFatal");
        Ok(())
    }
}

struct RunningStream {
    receiver_stop: Arc<AtomicBool>,
    processing_stop: Arc<AtomicBool>,
    receiver_task: JoinHandle<DaqResult<()>>,
    processing_task: JoinHandle<()>,
    endpoint: IpAddr,
}

/// Owns the lifecycle state machine and every long-lived component, exposing
/// the operations surface named in spec.md §6.
pub struct Supervisor {
    state: Mutex<SupervisorStateMachine<Ctx>>,
    tracked_state: Mutex<SupervisorStates>,
    retry_count: Arc<AtomicU32>,
    prefs: Mutex<Preferences>,
    ring: Arc<RawRing>,
    viz: Arc<VizBuffer>,
    counters: Arc<Counters>,
    writer_slot: WriterSlot,
    processing_shared: Mutex<Option<ProcessingShared>>,
    resolver: Arc<CalibrationResolver>,
    stream: Mutex<Option<RunningStream>>,
}

impl Supervisor {
    pub fn new(prefs: Preferences, ring_capacity: usize) -> DaqResult<Self> {
        prefs.validate()?;
        let retry_count = Arc::new(AtomicU32::new(0));
        let ctx = Ctx { retry_count: retry_count.clone() };
        Ok(Self {
            state: Mutex::new(SupervisorStateMachine::new(ctx)),
            tracked_state: Mutex::new(SupervisorStates::Disconnected),
            retry_count,
            prefs: Mutex::new(prefs),
            ring: Arc::new(RawRing::new(ring_capacity)),
            viz: Arc::new(VizBuffer::new()),
            counters: Arc::new(Counters::default()),
            writer_slot: Arc::new(ArcSwapOption::empty()),
            processing_shared: Mutex::new(None),
            resolver: Arc::new(CalibrationResolver::new()),
            stream: Mutex::new(None),
        })
    }

    pub fn current_state(&self) -> SupervisorStates {
        *self.tracked_state.lock()
    }

    /// Fires `event` against the state machine and records `new_state` if
    /// the transition was legal. Kept as a single chokepoint since smlang's
    /// generated `process_event` is the only source of truth for which
    /// transitions are actually legal from the current state; `new_state`
    /// must match the transition table in the `statemachine!` block above.
    fn fire(&self, event: SupervisorEvents, new_state: SupervisorStates) -> DaqResult<()> {
        self.state.lock().process_event(event).map_err(|_| {
            DaqError::config(format!("invalid transition for event {event:?} from {:?}", self.current_state()))
        })?;
        *self.tracked_state.lock() = new_state;
        Ok(())
    }

    /// Same as `fire`, but treats an illegal transition as a no-op rather
    /// than an error — used for events fired speculatively (e.g. `Stop` when
    /// nothing may be running).
    fn fire_best_effort(&self, event: SupervisorEvents, new_state: SupervisorStates) {
        let _ = self.fire(event, new_state);
    }

    /// Connects to `endpoint`: resolves calibration, then spawns the
    /// receiver and processing tasks (spec.md §4.8's connect → calibrate →
    /// stream sequence).
    pub async fn connect(&self, endpoint: IpAddr) -> DaqResult<()> {
        self.fire(SupervisorEvents::Connect, SupervisorStates::Connecting)?;
        self.retry_count.store(0, Ordering::SeqCst);
        self.resolver.invalidate_if_different(endpoint);

        let (http_port, tcp_port, udp_port, connect_timeout) = {
            let prefs = self.prefs.lock();
            (prefs.connection.http_port, prefs.connection.tcp_port, prefs.connection.udp_port, prefs.connection.connect_timeout)
        };

        self.fire_best_effort(SupervisorEvents::Connected, SupervisorStates::Calibrating);

        let calibration = match self.resolver.resolve(endpoint, http_port, tcp_port, connect_timeout).await {
            Ok(cal) => cal,
            Err(e) => {
                self.retry_count.fetch_add(1, Ordering::SeqCst);
                let recovered = SupervisorStates::ErrorRecoverable;
                self.fire_best_effort(SupervisorEvents::CalibrationFailed, recovered);
                return Err(e);
            }
        };

        let shared = ProcessingShared::new(calibration);
        {
            let filter_prefs = self.prefs.lock().filtering;
            shared.filter_config.store(Arc::new(FilterConfig {
                enabled: filter_prefs.enabled,
                cutoff_hz: filter_prefs.cutoff_hz,
            }));
        }
        *self.processing_shared.lock() = Some(shared.clone());

        self.fire(SupervisorEvents::Calibrated, SupervisorStates::Streaming)?;

        let receiver_stop = Arc::new(AtomicBool::new(false));
        let processing_stop = Arc::new(AtomicBool::new(false));
        let decimation_factor = self.prefs.lock().logging.decimation_factor;

        let receiver_task = tokio::spawn(receiver::run(
            endpoint,
            udp_port,
            decimation_factor,
            self.ring.clone(),
            self.counters.clone(),
            receiver_stop.clone(),
        ));
        let processing_task = tokio::spawn(processing::run(
            self.ring.clone(),
            self.viz.clone(),
            self.writer_slot.clone(),
            shared,
            self.counters.clone(),
            processing_stop.clone(),
        ));

        *self.stream.lock() = Some(RunningStream {
            receiver_stop,
            processing_stop,
            receiver_task,
            processing_task,
            endpoint,
        });

        Ok(())
    }

    /// Stops the active stream and any in-progress recording, returning to
    /// Disconnected (spec.md §5: stop returns after both tasks drain, or the
    /// bounded join timeout elapses).
    pub async fn disconnect(&self) -> DaqResult<()> {
        let running = self.stream.lock().take();
        if let Some(running) = running {
            running.receiver_stop.store(true, Ordering::SeqCst);
            running.processing_stop.store(true, Ordering::SeqCst);

            let recv_result = tokio::time::timeout(Duration::from_secs(2), running.receiver_task).await;
            let proc_result = tokio::time::timeout(Duration::from_secs(2), running.processing_task).await;

            self.stop_recording().await?;

            self.fire_best_effort(SupervisorEvents::Stop, SupervisorStates::Disconnected);

            if recv_result.is_err() || proc_result.is_err() {
                warn!(target: "supervisor", "receiver/processing did not join within the bounded timeout");
            }
        }
        Ok(())
    }

    /// Spawns a background task that retries `connect(endpoint)` with
    /// bounded exponential backoff while the supervisor sits in
    /// ErrorRecoverable (spec.md §5's auto-reconnect), stopping once it
    /// reaches Streaming or escalates to ErrorFatal. Only meaningful when
    /// `connection.auto_reconnect` is set; callers gate on that preference
    /// before invoking it.
    pub fn spawn_auto_reconnect(self: &Arc<Self>, endpoint: IpAddr) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                if this.current_state() != SupervisorStates::ErrorRecoverable {
                    break;
                }
                let attempt = this.retry_count.load(Ordering::SeqCst);
                let backoff = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(6)).min(BACKOFF_CAP);
                tokio::time::sleep(backoff).await;

                if this.current_state() != SupervisorStates::ErrorRecoverable {
                    break;
                }
                match this.connect(endpoint).await {
                    Ok(()) => break,
                    Err(e) => warn!(target: "supervisor", "auto-reconnect attempt failed: {e}"),
                }
            }
        })
    }

    /// Issues a bias operation per the configured mode (spec.md §4.7, §6).
    pub async fn bias(&self, mode: BiasMode) -> DaqResult<()> {
        match mode {
            BiasMode::Soft => {
                let shared = self.processing_shared.lock().clone();
                let shared = shared.ok_or_else(|| DaqError::config("bias(soft) requires an active connection"))?;
                let last = self.ring.snapshot_last(1);
                let counts = last.first().map(|s| s.counts).unwrap_or([0; 6]);
                shared.apply_soft_bias(counts);
                Ok(())
            }
            BiasMode::Device => {
                let running = self.stream.lock();
                let endpoint = running.as_ref().map(|r| r.endpoint).ok_or_else(|| {
                    DaqError::config("bias(device) requires an active connection")
                })?;
                drop(running);
                let (udp_port, tcp_port, timeout) = {
                    let prefs = self.prefs.lock();
                    (prefs.connection.udp_port, prefs.connection.tcp_port, prefs.connection.connect_timeout)
                };
                let channel = CommandChannel::new(endpoint, udp_port, tcp_port, timeout);
                channel.bias_device().await
            }
        }
    }

    /// Issues WRITETRANSFORM over the TCP command channel (spec.md §6).
    pub async fn set_tool_transform(&self, dx: f64, dy: f64, dz: f64, rx: f64, ry: f64, rz: f64) -> DaqResult<()> {
        let endpoint = self.stream.lock().as_ref().map(|r| r.endpoint);
        let endpoint = endpoint.ok_or_else(|| DaqError::config("set_tool_transform requires an active connection"))?;
        let (tcp_port, udp_port, timeout) = {
            let prefs = self.prefs.lock();
            (prefs.connection.tcp_port, prefs.connection.udp_port, prefs.connection.connect_timeout)
        };
        let channel = CommandChannel::new(endpoint, udp_port, tcp_port, timeout);
        channel.set_tool_transform(dx, dy, dz, rx, ry, rz).await
    }

    /// Overrides the active calibration without a network round-trip
    /// (spec.md §6's `set_calibration_override`). Passing `None` restores
    /// normal resolver-driven calibration on the next `connect`.
    pub fn set_calibration_override(&self, info: Option<CalibrationInfo>) -> DaqResult<()> {
        let shared = self.processing_shared.lock().clone();
        let shared = shared.ok_or_else(|| DaqError::config("set_calibration_override requires an active connection"))?;
        if let Some(info) = info {
            shared.calibration.store(Arc::new(info));
        }
        Ok(())
    }

    /// Attaches a writer to begin recording (spec.md §6). Independent of the
    /// connection lifecycle's Streaming state: visualization keeps running
    /// either way.
    pub async fn start_recording(&self, path: std::path::PathBuf, format: LogFormat, prefix: String) -> DaqResult<()> {
        let (cal, filter_cfg) = {
            let shared = self.processing_shared.lock().clone();
            let shared = shared.ok_or_else(|| DaqError::config("start_recording requires an active connection"))?;
            (**shared.calibration.load(), **shared.filter_config.load())
        };
        let units = self.prefs.lock().units;

        let meta = SessionMeta {
            serial: cal.serial.map(|s| s.to_string()),
            firmware: cal.firmware_version.map(|v| v.to_string()),
            cpf: cal.cpf,
            cpt: cal.cpt,
            session_start: Utc::now(),
            force_unit: units.force,
            torque_unit: units.torque,
            filter_enabled: filter_cfg.enabled,
            filter_cutoff_hz: filter_cfg.cutoff_hz,
        };

        let (flush_interval_ms, rotation_enabled, rotation_size_bytes, rotation_time_minutes) = {
            let prefs = self.prefs.lock();
            (
                prefs.logging.flush_interval_ms,
                prefs.logging.rotation_enabled,
                prefs.logging.rotation_size_bytes,
                prefs.logging.rotation_time_minutes,
            )
        };
        let writer_config = WriterConfig {
            output_directory: path,
            filename_prefix: prefix,
            format,
            batch_size: 100,
            flush_interval: Duration::from_millis(flush_interval_ms),
            rotation_enabled,
            rotation_size_bytes,
            rotation_time: Duration::from_secs(rotation_time_minutes * 60),
        };

        let writer = FileWriter::spawn(writer_config, meta, 1_000, self.counters.clone()).await?;
        self.writer_slot.store(Some(Arc::new(writer)));
        Ok(())
    }

    /// Detaches the writer and waits for it to drain and close its file.
    pub async fn stop_recording(&self) -> DaqResult<()> {
        let previous = self.writer_slot.swap(None);
        if let Some(writer) = previous {
            match Arc::try_unwrap(writer) {
                Ok(writer) => writer.stop().await?,
                Err(_) => warn!(target: "supervisor", "writer still referenced; skipping graceful stop"),
            }
        }
        Ok(())
    }

    pub fn snapshot_stats(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }

    /// Returns a downsampled series for `window_sec` within `point_budget`
    /// (spec.md §4.5, §6). `channels` is accepted for API fidelity with
    /// spec.md §6; channel selection for rendering is a GUI concern (§1
    /// Out of scope), so all six columns are always returned and the caller
    /// picks which to draw.
    pub fn get_series(&self, window_sec: u64, _channels: [bool; 6], point_budget: usize) -> Series {
        self.viz.get_series(window_sec, point_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let sup = Supervisor::new(Preferences::default(), 1024).unwrap();
        assert_eq!(sup.current_state(), SupervisorStates::Disconnected);
    }

    #[test]
    fn rejects_invalid_preferences() {
        let mut prefs = Preferences::default();
        prefs.visualization.time_window_sec = 0;
        assert!(Supervisor::new(prefs, 1024).is_err());
    }

    #[tokio::test]
    async fn bias_without_connection_is_an_error() {
        let sup = Supervisor::new(Preferences::default(), 1024).unwrap();
        assert!(sup.bias(BiasMode::Soft).await.is_err());
    }
}

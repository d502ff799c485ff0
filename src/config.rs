//! Preferences: the configuration object that drives the core (spec.md §6).
//!
//! Persistence is an external collaborator's job (Non-goals); this module
//! only models the schema, defaults, and range validation, the way the
//! teacher repo models a `Config` per device (see `el3356.rs::Config`).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::error::DaqError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ForceUnit {
    N,
    Lbf,
    Kgf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TorqueUnit {
    Nm,
    Nmm,
    LbfIn,
    LbfFt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BiasMode {
    Device,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Csv,
    Tsv,
    ExcelCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionPrefs {
    pub last_ip: Option<IpAddr>,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub http_port: u16,
    #[schemars(with = "u64")]
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    pub auto_reconnect: bool,
    pub discovery_subnets: Vec<String>,
}

impl Default for ConnectionPrefs {
    fn default() -> Self {
        Self {
            last_ip: None,
            udp_port: 49152,
            tcp_port: 49151,
            http_port: 80,
            connect_timeout: Duration::from_secs(2),
            auto_reconnect: true,
            discovery_subnets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VisualizationPrefs {
    pub channels_enabled: [bool; 6],
    pub time_window_sec: u32,
    pub autoscale: bool,
    pub manual_y_range: Option<(f64, f64)>,
    pub show_grid: bool,
    pub show_crosshair: bool,
    pub max_points_per_channel: usize,
}

impl Default for VisualizationPrefs {
    fn default() -> Self {
        Self {
            channels_enabled: [true; 6],
            time_window_sec: 60,
            autoscale: true,
            manual_y_range: None,
            show_grid: true,
            show_crosshair: true,
            max_points_per_channel: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct UnitPrefs {
    pub force: ForceUnit,
    pub torque: TorqueUnit,
}

impl Default for UnitPrefs {
    fn default() -> Self {
        Self { force: ForceUnit::N, torque: TorqueUnit::Nm }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct FilterPrefs {
    pub enabled: bool,
    pub cutoff_hz: f64,
}

impl Default for FilterPrefs {
    fn default() -> Self {
        Self { enabled: false, cutoff_hz: 20.0 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct BiasPrefs {
    pub mode: BiasMode,
}

impl Default for BiasPrefs {
    fn default() -> Self {
        Self { mode: BiasMode::Soft }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LoggingPrefs {
    pub output_directory: String,
    pub filename_prefix: String,
    pub format: LogFormat,
    pub flush_interval_ms: u64,
    pub decimation_factor: u32,
    pub rotation_enabled: bool,
    pub rotation_size_bytes: u64,
    pub rotation_time_minutes: u64,
}

impl Default for LoggingPrefs {
    fn default() -> Self {
        Self {
            output_directory: ".".to_string(),
            filename_prefix: String::new(),
            format: LogFormat::Csv,
            flush_interval_ms: 250,
            decimation_factor: 1,
            rotation_enabled: false,
            rotation_size_bytes: 100 * 1024 * 1024,
            rotation_time_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
pub struct ToolTransformPrefs {
    pub dx_mm: f64,
    pub dy_mm: f64,
    pub dz_mm: f64,
    pub rx_deg: f64,
    pub ry_deg: f64,
    pub rz_deg: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Preferences {
    pub connection: ConnectionPrefs,
    pub visualization: VisualizationPrefs,
    pub units: UnitPrefs,
    pub filtering: FilterPrefs,
    pub bias: BiasPrefs,
    pub logging: LoggingPrefs,
    pub tool_transform: ToolTransformPrefs,
}

impl Preferences {
    /// Validates range-bound fields per spec.md §6. Returns the first violation found.
    pub fn validate(&self) -> Result<(), DaqError> {
        let w = self.visualization.time_window_sec;
        if !(1..=604_800).contains(&w) {
            return Err(DaqError::config(format!(
                "visualization.time_window_sec out of range [1, 604800]: {w}"
            )));
        }
        let c = self.filtering.cutoff_hz;
        if !(0.7..=120.0).contains(&c) {
            return Err(DaqError::config(format!(
                "filtering.cutoff_hz out of range [0.7, 120]: {c}"
            )));
        }
        if self.logging.decimation_factor < 1 {
            return Err(DaqError::config("logging.decimation_factor must be >= 1"));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

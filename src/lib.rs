//! netrs-daq: real-time acquisition, conversion, multi-resolution
//! visualization buffering, and rotating-file logging core for a 6-axis
//! force/torque transducer UDP/TCP/HTTP stream.
//!
//! The crate is organized the way the teacher repo organizes a device
//! driver: small, independently testable modules (wire codec, ring buffer,
//! filter, viz buffer, writer) wired together by a single `Supervisor` that
//! owns the lifecycle state machine and the long-lived tasks.

pub mod calibration;
pub mod command;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod processing;
pub mod receiver;
pub mod ring;
pub mod sample;
pub mod stats;
pub mod supervisor;
pub mod viz;
pub mod wire;
pub mod writer;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use config::Preferences;
pub use error::{DaqError, DaqResult};
pub use sample::{CalibrationInfo, SampleRecord};
pub use supervisor::Supervisor;

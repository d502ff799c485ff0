//! Core data model: `SampleRecord`, `CalibrationInfo`, and the egress unit
//! conversion factors (spec.md §3, §4.4).

use crate::config::{ForceUnit, TorqueUnit};

/// Channel order is fixed throughout the crate: Fx, Fy, Fz, Tx, Ty, Tz.
pub const NUM_CHANNELS: usize = 6;

/// An immutable, decoded sample as it flows from the wire codec through the
/// raw ring, the processing stage, the visualization buffer, and the writer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRecord {
    pub t_mono_ns: u64,
    pub rdt_sequence: u32,
    pub ft_sequence: u32,
    pub status: u32,
    pub counts: [i32; 6],
    pub force_n: Option<[f64; 3]>,
    pub torque_nm: Option<[f64; 3]>,
}

impl SampleRecord {
    pub fn new(t_mono_ns: u64, rdt_sequence: u32, ft_sequence: u32, status: u32, counts: [i32; 6]) -> Self {
        Self {
            t_mono_ns,
            rdt_sequence,
            ft_sequence,
            status,
            counts,
            force_n: None,
            torque_nm: None,
        }
    }

    /// All six channel values in canonical order, preferring derived SI
    /// values when present and falling back to raw counts otherwise (used
    /// by the visualization buffer, which accepts either).
    pub fn channel_values(&self) -> [f64; 6] {
        let mut out = [0.0; 6];
        match (self.force_n, self.torque_nm) {
            (Some(f), Some(t)) => {
                out[0..3].copy_from_slice(&f);
                out[3..6].copy_from_slice(&t);
            }
            _ => {
                for i in 0..6 {
                    out[i] = self.counts[i] as f64;
                }
            }
        }
        out
    }
}

/// Calibration scale factors for one connected endpoint (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationInfo {
    pub cpf: f64,
    pub cpt: f64,
    pub serial: Option<u32>,
    pub firmware_version: Option<u16>,
    pub force_unit_code: Option<u8>,
    pub torque_unit_code: Option<u8>,
}

impl CalibrationInfo {
    pub fn new(cpf: f64, cpt: f64) -> Result<Self, &'static str> {
        if !(cpf.is_finite() && cpf > 0.0) {
            return Err("cpf must be positive and finite");
        }
        if !(cpt.is_finite() && cpt > 0.0) {
            return Err("cpt must be positive and finite");
        }
        Ok(Self {
            cpf,
            cpt,
            serial: None,
            firmware_version: None,
            force_unit_code: None,
            torque_unit_code: None,
        })
    }
}

/// Conversion factors applied only at the egress boundary (display/logging),
/// never to the canonical internal N / N·m values (spec.md §4.4).
pub const LBF_PER_N: f64 = 1.0 / 4.4482216152605;
pub const KGF_PER_N: f64 = 1.0 / 9.80665;
pub const NMM_PER_NM: f64 = 1000.0;
pub const LBFIN_PER_NM: f64 = 1.0 / (4.4482216152605 * 0.0254);
pub const LBFFT_PER_NM: f64 = 1.0 / (4.4482216152605 * 0.3048);

pub fn convert_force(n: f64, unit: ForceUnit) -> f64 {
    match unit {
        ForceUnit::N => n,
        ForceUnit::Lbf => n * LBF_PER_N,
        ForceUnit::Kgf => n * KGF_PER_N,
    }
}

pub fn convert_torque(nm: f64, unit: TorqueUnit) -> f64 {
    match unit {
        TorqueUnit::Nm => nm,
        TorqueUnit::Nmm => nm * NMM_PER_NM,
        TorqueUnit::LbfIn => nm * LBFIN_PER_NM,
        TorqueUnit::LbfFt => nm * LBFFT_PER_NM,
    }
}

pub fn force_unit_label(unit: ForceUnit) -> &'static str {
    match unit {
        ForceUnit::N => "N",
        ForceUnit::Lbf => "lbf",
        ForceUnit::Kgf => "kgf",
    }
}

pub fn torque_unit_label(unit: TorqueUnit) -> &'static str {
    match unit {
        TorqueUnit::Nm => "N*m",
        TorqueUnit::Nmm => "N*mm",
        TorqueUnit::LbfIn => "lbf*in",
        TorqueUnit::LbfFt => "lbf*ft",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_rejects_nonpositive() {
        assert!(CalibrationInfo::new(0.0, 1.0).is_err());
        assert!(CalibrationInfo::new(1.0, -1.0).is_err());
        assert!(CalibrationInfo::new(f64::NAN, 1.0).is_err());
        assert!(CalibrationInfo::new(1.0, 1.0).is_ok());
    }

    #[test]
    fn conversion_factors_roundtrip_reasonably() {
        // 1 lbf ~= 4.4482216152605 N
        assert!((convert_force(4.4482216152605, ForceUnit::Lbf) - 1.0).abs() < 1e-9);
        assert!((convert_torque(1000.0, TorqueUnit::Nmm) - 1.0).abs() < 1e-9);
    }
}

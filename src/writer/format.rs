//! Per-format row/header serialization (spec.md §4.6): CSV, TSV, and
//! Excel-compatible CSV (CRLF + UTF-8 BOM + conservative quoting).

use chrono::{DateTime, Utc};

use crate::config::{ForceUnit, LogFormat, TorqueUnit};
use crate::sample::{convert_force, convert_torque, force_unit_label, torque_unit_label};
use crate::sample::SampleRecord;

/// Everything written into every part's metadata header.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub serial: Option<String>,
    pub firmware: Option<String>,
    pub cpf: f64,
    pub cpt: f64,
    pub session_start: DateTime<Utc>,
    pub force_unit: ForceUnit,
    pub torque_unit: TorqueUnit,
    pub filter_enabled: bool,
    pub filter_cutoff_hz: f64,
}

fn newline(format: LogFormat) -> &'static str {
    match format {
        LogFormat::Csv | LogFormat::Tsv => "\n",
        LogFormat::ExcelCompatible => "\r\n",
    }
}

fn separator(format: LogFormat) -> char {
    match format {
        LogFormat::Csv | LogFormat::ExcelCompatible => ',',
        LogFormat::Tsv => '\t',
    }
}

fn needs_quoting(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\r') || field.contains('\n')
}

fn quote_field(format: LogFormat, field: &str) -> String {
    let sep = separator(format);
    match format {
        LogFormat::ExcelCompatible if needs_quoting(field, sep) => {
            format!("\"{}\"", field.replace('"', "\"\""))
        }
        _ => field.to_string(),
    }
}

fn join_row(format: LogFormat, fields: &[String]) -> String {
    let sep = separator(format);
    let quoted: Vec<String> = fields.iter().map(|f| quote_field(format, f)).collect();
    let mut row = quoted.join(&sep.to_string());
    row.push_str(newline(format));
    row
}

/// UTF-8 BOM prefix for Excel-compatible CSV, written once at the start of
/// every part (spec.md §4.6).
pub fn bom_prefix(format: LogFormat) -> &'static [u8] {
    match format {
        LogFormat::ExcelCompatible => &[0xEF, 0xBB, 0xBF],
        _ => &[],
    }
}

pub fn file_extension(format: LogFormat) -> &'static str {
    match format {
        LogFormat::Csv => "csv",
        LogFormat::Tsv => "tsv",
        LogFormat::ExcelCompatible => "csv",
    }
}

/// `#`-prefixed metadata comment lines, written to the top of every part.
pub fn metadata_header(format: LogFormat, meta: &SessionMeta) -> String {
    let nl = newline(format);
    let mut out = String::new();
    out.push_str(&format!("# serial: {}{nl}", meta.serial.as_deref().unwrap_or("unknown")));
    out.push_str(&format!("# firmware: {}{nl}", meta.firmware.as_deref().unwrap_or("unknown")));
    out.push_str(&format!("# cpf: {}{nl}", meta.cpf));
    out.push_str(&format!("# cpt: {}{nl}", meta.cpt));
    out.push_str(&format!("# session_start: {}{nl}", meta.session_start.to_rfc3339()));
    out.push_str(&format!(
        "# units: force={} torque={}{nl}",
        force_unit_label(meta.force_unit),
        torque_unit_label(meta.torque_unit)
    ));
    out.push_str(&format!(
        "# filter: enabled={} cutoff_hz={}{nl}",
        meta.filter_enabled, meta.filter_cutoff_hz
    ));
    out
}

/// Column-name header row, written immediately after the metadata block.
pub fn column_header(format: LogFormat, meta: &SessionMeta) -> String {
    let fu = force_unit_label(meta.force_unit);
    let tu = torque_unit_label(meta.torque_unit);
    let fields = vec![
        "timestamp_utc".to_string(),
        "t_mono_ns".to_string(),
        "rdt_sequence".to_string(),
        "ft_sequence".to_string(),
        "status".to_string(),
        format!("Fx [{fu}]"),
        format!("Fy [{fu}]"),
        format!("Fz [{fu}]"),
        format!("Tx [{tu}]"),
        format!("Ty [{tu}]"),
        format!("Tz [{tu}]"),
    ];
    join_row(format, &fields)
}

/// Serializes one data row: timestamp, `t_mono_ns`, sequences, status, then
/// six engineering-unit columns in the configured display units (spec.md §4.6).
pub fn data_row(format: LogFormat, meta: &SessionMeta, timestamp: DateTime<Utc>, sample: &SampleRecord) -> String {
    let (force_n, torque_nm) = (
        sample.force_n.unwrap_or([sample.counts[0] as f64, sample.counts[1] as f64, sample.counts[2] as f64]),
        sample.torque_nm.unwrap_or([sample.counts[3] as f64, sample.counts[4] as f64, sample.counts[5] as f64]),
    );
    let fields = vec![
        timestamp.to_rfc3339(),
        sample.t_mono_ns.to_string(),
        sample.rdt_sequence.to_string(),
        sample.ft_sequence.to_string(),
        sample.status.to_string(),
        convert_force(force_n[0], meta.force_unit).to_string(),
        convert_force(force_n[1], meta.force_unit).to_string(),
        convert_force(force_n[2], meta.force_unit).to_string(),
        convert_torque(torque_nm[0], meta.torque_unit).to_string(),
        convert_torque(torque_nm[1], meta.torque_unit).to_string(),
        convert_torque(torque_nm[2], meta.torque_unit).to_string(),
    ];
    join_row(format, &fields)
}

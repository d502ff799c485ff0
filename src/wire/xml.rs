//! HTTP calibration document parsing (spec.md §4.1, §6).
//!
//! The sensor's calibration XML shape beyond the two required fields is not
//! specified, so this scans events with `quick_xml` rather than binding to a
//! fixed `struct` — any element whose (namespace-stripped, case- and
//! separator-insensitive) name matches `counts_per_force` / `counts_per_torque`
//! contributes its text content; everything else is ignored, matching "parse
//! the XML... ignore unknown fields" in spec.md §4.1.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::CalError;

fn normalize(tag: &str) -> String {
    let local = tag.rsplit(':').next().unwrap_or(tag);
    local.chars().filter(|c| c.is_alphanumeric()).map(|c| c.to_ascii_lowercase()).collect()
}

/// Parses an XML calibration document, extracting `counts_per_force` and
/// `counts_per_torque`. Any parse failure or missing required field is a
/// `CalError::ParseFailed`, which the resolver treats as an HTTP-path
/// failure and falls back to TCP.
pub fn parse_calibration_xml(xml: &str) -> Result<(f64, f64), CalError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut cpf: Option<f64> = None;
    let mut cpt: Option<f64> = None;
    let mut current: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                current = Some(normalize(&name));
            }
            Ok(Event::Text(t)) => {
                if let Some(tag) = current.as_deref() {
                    let text = t.unescape().map_err(|e| CalError::ParseFailed(e.to_string()))?;
                    match tag {
                        "countsperforce" => cpf = text.trim().parse::<f64>().ok(),
                        "countspertorque" => cpt = text.trim().parse::<f64>().ok(),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(_) => {}
            Err(e) => return Err(CalError::ParseFailed(e.to_string())),
        }
        buf.clear();
    }

    match (cpf, cpt) {
        (Some(cpf), Some(cpt)) => Ok((cpf, cpt)),
        _ => Err(CalError::ParseFailed("missing counts_per_force / counts_per_torque".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_document() {
        let xml = r#"<Calibration><CountsPerForce>1000000</CountsPerForce><CountsPerTorque>2000000</CountsPerTorque></Calibration>"#;
        let (cpf, cpt) = parse_calibration_xml(xml).unwrap();
        assert_eq!(cpf, 1_000_000.0);
        assert_eq!(cpt, 2_000_000.0);
    }

    #[test]
    fn parses_nested_document_with_extra_fields() {
        let xml = r#"
            <calibration>
                <info><serial>FT12345</serial></info>
                <scaling>
                    <counts_per_force>500000</counts_per_force>
                    <counts_per_torque>800000</counts_per_torque>
                    <units>N</units>
                </scaling>
            </calibration>"#;
        let (cpf, cpt) = parse_calibration_xml(xml).unwrap();
        assert_eq!(cpf, 500_000.0);
        assert_eq!(cpt, 800_000.0);
    }

    #[test]
    fn missing_field_is_parse_failed() {
        let xml = r#"<Calibration><CountsPerForce>1000000</CountsPerForce></Calibration>"#;
        assert!(parse_calibration_xml(xml).is_err());
    }

    #[test]
    fn malformed_xml_is_parse_failed() {
        assert!(parse_calibration_xml("<not-xml").is_err());
    }
}

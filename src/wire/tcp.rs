//! TCP command-channel frames (spec.md §4.1): calibration request/reply,
//! write-tool-transform request, and the READFT bias-fallback request.
//! All three outbound requests share a 20-byte frame: one command byte
//! followed by a 19-byte, command-specific payload.

use byteorder::{BigEndian, ByteOrder};

use crate::error::ProtoError;

pub const TCP_REQUEST_LEN: usize = 20;
pub const CAL_RESPONSE_LEN: usize = 24;
pub const CAL_RESPONSE_HEADER: u16 = 0x1234;

const CMD_READFT: u8 = 0x00;
const CMD_READCALINFO: u8 = 0x01;
const CMD_WRITETRANSFORM: u8 = 0x02;

/// READCALINFO request: command 0x01, 19 zero bytes.
pub fn calibration_request() -> [u8; TCP_REQUEST_LEN] {
    let mut buf = [0u8; TCP_REQUEST_LEN];
    buf[0] = CMD_READCALINFO;
    buf
}

/// Decoded READCALINFO reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationReply {
    pub force_units_code: u8,
    pub torque_units_code: u8,
    pub cpf: u32,
    pub cpt: u32,
    pub scale_factors: [u16; 6],
}

pub fn decode_calibration_reply(buf: &[u8]) -> Result<CalibrationReply, ProtoError> {
    if buf.len() != CAL_RESPONSE_LEN {
        return Err(ProtoError::WrongLength { expected: CAL_RESPONSE_LEN, got: buf.len() });
    }
    let header = BigEndian::read_u16(&buf[0..2]);
    if header != CAL_RESPONSE_HEADER {
        return Err(ProtoError::UnexpectedResponse(format!(
            "calibration reply header {header:#06x}, expected {CAL_RESPONSE_HEADER:#06x}"
        )));
    }
    let force_units_code = buf[2];
    let torque_units_code = buf[3];
    let cpf = BigEndian::read_u32(&buf[4..8]);
    let cpt = BigEndian::read_u32(&buf[8..12]);
    let mut scale_factors = [0u16; 6];
    for (i, s) in scale_factors.iter_mut().enumerate() {
        let off = 12 + i * 2;
        *s = BigEndian::read_u16(&buf[off..off + 2]);
    }
    Ok(CalibrationReply { force_units_code, torque_units_code, cpf, cpt, scale_factors })
}

/// WRITETRANSFORM request. Distances in mm, angles in degrees; both are
/// encoded as the value times 100, truncated to an `i16`. 3 = mm, 1 = degrees
/// are the only unit codes this crate emits (spec.md §4.1).
pub fn write_transform_request(dx: f64, dy: f64, dz: f64, rx: f64, ry: f64, rz: f64) -> [u8; TCP_REQUEST_LEN] {
    let mut buf = [0u8; TCP_REQUEST_LEN];
    buf[0] = CMD_WRITETRANSFORM;
    buf[1] = 3; // distance units: mm
    buf[2] = 1; // angle units: degrees
    let values = [dx, dy, dz, rx, ry, rz];
    for (i, v) in values.iter().enumerate() {
        let scaled = (v * 100.0).round() as i16;
        let off = 3 + i * 2;
        BigEndian::write_i16(&mut buf[off..off + 2], scaled);
    }
    // bytes 15..20 are reserved zero, already zero-initialized.
    buf
}

/// READFT bias-fallback request: command 0x00, 15 zero bytes, then
/// `MCEnable=0`, then `sysCommands` with bit 0 set (bias/tare).
pub fn bias_readft_request() -> [u8; TCP_REQUEST_LEN] {
    let mut buf = [0u8; TCP_REQUEST_LEN];
    buf[0] = CMD_READFT;
    BigEndian::write_u16(&mut buf[16..18], 0); // MCEnable
    BigEndian::write_u16(&mut buf[18..20], 0x0001); // sysCommands, bit 0 set
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_request_is_command_then_zeros() {
        let buf = calibration_request();
        assert_eq!(buf[0], CMD_READCALINFO);
        assert!(buf[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn bias_request_shape() {
        let buf = bias_readft_request();
        assert_eq!(buf[0], CMD_READFT);
        assert!(buf[1..16].iter().all(|&b| b == 0));
        assert_eq!(&buf[16..18], &[0, 0]);
        assert_eq!(&buf[18..20], &[0, 1]);
    }

    #[test]
    fn transform_request_scales_by_100() {
        let buf = write_transform_request(1.0, -2.5, 0.0, 90.0, 0.0, -45.0);
        assert_eq!(buf[0], CMD_WRITETRANSFORM);
        assert_eq!(buf[1], 3);
        assert_eq!(buf[2], 1);
        assert_eq!(BigEndian::read_i16(&buf[3..5]), 100);
        assert_eq!(BigEndian::read_i16(&buf[5..7]), -250);
        assert_eq!(BigEndian::read_i16(&buf[9..11]), 9000);
        assert_eq!(&buf[15..20], &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn decodes_calibration_reply() {
        let mut raw = vec![0u8; CAL_RESPONSE_LEN];
        BigEndian::write_u16(&mut raw[0..2], CAL_RESPONSE_HEADER);
        raw[2] = 1; // force units
        raw[3] = 2; // torque units
        BigEndian::write_u32(&mut raw[4..8], 500_000);
        BigEndian::write_u32(&mut raw[8..12], 800_000);
        for i in 0..6 {
            BigEndian::write_u16(&mut raw[12 + i * 2..14 + i * 2], (i + 1) as u16);
        }
        let reply = decode_calibration_reply(&raw).unwrap();
        assert_eq!(reply.cpf, 500_000);
        assert_eq!(reply.cpt, 800_000);
        assert_eq!(reply.scale_factors, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn rejects_bad_header() {
        let mut raw = vec![0u8; CAL_RESPONSE_LEN];
        BigEndian::write_u16(&mut raw[0..2], 0xABCD);
        assert!(decode_calibration_reply(&raw).is_err());
    }
}

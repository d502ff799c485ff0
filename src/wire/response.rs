//! UDP response frame: 36 bytes, big-endian.
//! `[u32 rdt_seq][u32 ft_seq][u32 status][i32; 6 counts Fx..Tz]`

use byteorder::{BigEndian, ByteOrder};

use crate::error::ProtoError;

pub const RESPONSE_LEN: usize = 36;

/// Decoded wire fields prior to time-stamping and ring insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedResponse {
    pub rdt_sequence: u32,
    pub ft_sequence: u32,
    pub status: u32,
    pub counts: [i32; 6],
}

/// Rejects any datagram whose length is not exactly 36 bytes (spec.md §4.1).
/// The receiver is responsible for counting this as a codec error and
/// continuing the loop; this function only classifies the bytes.
pub fn decode_response(buf: &[u8]) -> Result<DecodedResponse, ProtoError> {
    if buf.len() != RESPONSE_LEN {
        return Err(ProtoError::WrongLength { expected: RESPONSE_LEN, got: buf.len() });
    }
    let rdt_sequence = BigEndian::read_u32(&buf[0..4]);
    let ft_sequence = BigEndian::read_u32(&buf[4..8]);
    let status = BigEndian::read_u32(&buf[8..12]);
    let mut counts = [0i32; 6];
    for (i, c) in counts.iter_mut().enumerate() {
        let off = 12 + i * 4;
        *c = BigEndian::read_i32(&buf[off..off + 4]);
    }
    Ok(DecodedResponse { rdt_sequence, ft_sequence, status, counts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    fn build(rdt: u32, ft: u32, status: u32, counts: [i32; 6]) -> Vec<u8> {
        let mut buf = vec![0u8; RESPONSE_LEN];
        BigEndian::write_u32(&mut buf[0..4], rdt);
        BigEndian::write_u32(&mut buf[4..8], ft);
        BigEndian::write_u32(&mut buf[8..12], status);
        for (i, c) in counts.iter().enumerate() {
            let off = 12 + i * 4;
            BigEndian::write_i32(&mut buf[off..off + 4], *c);
        }
        buf
    }

    #[test]
    fn decodes_roundtrip_values() {
        let counts = [1000, -1000, 5000, 100, -100, 50];
        let buf = build(1, 1, 0, counts);
        let decoded = decode_response(&buf).unwrap();
        assert_eq!(decoded.rdt_sequence, 1);
        assert_eq!(decoded.ft_sequence, 1);
        assert_eq!(decoded.status, 0);
        assert_eq!(decoded.counts, counts);
    }

    #[test]
    fn rejects_wrong_length() {
        let buf = vec![0u8; 35];
        match decode_response(&buf) {
            Err(ProtoError::WrongLength { expected, got }) => {
                assert_eq!(expected, RESPONSE_LEN);
                assert_eq!(got, 35);
            }
            _ => panic!("expected WrongLength"),
        }
    }
}

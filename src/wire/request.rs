//! UDP request datagram: 8 bytes, big-endian.
//! `[u16 header=0x1234][u16 command][u32 sample_count]`

use byteorder::{BigEndian, ByteOrder};

pub const REQUEST_HEADER: u16 = 0x1234;
pub const REQUEST_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdtCommand {
    Stop,
    StartInfinite,
    Bias,
}

impl RdtCommand {
    fn code(self) -> u16 {
        match self {
            RdtCommand::Stop => 0x0000,
            RdtCommand::StartInfinite => 0x0002,
            RdtCommand::Bias => 0x0042,
        }
    }
}

/// Encodes a request datagram. `sample_count` of 0 means "infinite" and is
/// the only value used for `StartInfinite` by this crate.
pub fn encode_request(command: RdtCommand, sample_count: u32) -> [u8; REQUEST_LEN] {
    let mut buf = [0u8; REQUEST_LEN];
    BigEndian::write_u16(&mut buf[0..2], REQUEST_HEADER);
    BigEndian::write_u16(&mut buf[2..4], command.code());
    BigEndian::write_u32(&mut buf[4..8], sample_count);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_start_infinite() {
        let buf = encode_request(RdtCommand::StartInfinite, 0);
        assert_eq!(buf, [0x12, 0x34, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn encodes_bias() {
        let buf = encode_request(RdtCommand::Bias, 0);
        assert_eq!(buf[2..4], [0x00, 0x42]);
    }

    #[test]
    fn encodes_stop() {
        let buf = encode_request(RdtCommand::Stop, 0);
        assert_eq!(buf[2..4], [0x00, 0x00]);
    }
}

//! Fixed-layout big-endian wire codec (spec.md §4.1).
//!
//! Encoding/decoding goes through `byteorder::BigEndian` rather than a
//! derive-macro bitfield crate: every frame here is byte-aligned fields at
//! fixed offsets, nothing needs sub-byte packing.

pub mod request;
pub mod response;
pub mod tcp;
pub mod xml;

pub use request::{encode_request, RdtCommand};
pub use response::{decode_response, RESPONSE_LEN};

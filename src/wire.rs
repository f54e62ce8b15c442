//! TFTP wire codec: RFC 1350 base opcodes only.
//!
//! Stateless encode/decode for the five packet variants. No option
//! negotiation (RFC 2347/2348/2349) — `mode` is carried verbatim and
//! compared case-insensitively, but only "octet" is ever acted upon by the
//! engine.

use thiserror::Error;

/// Largest DATA payload carried by one block.
pub const MAX_PAYLOAD: usize = 512;

/// Largest block number a base-protocol transfer can reach before wrapping
/// is undefined (RFC 1350 has no window; this is just the u16 range).
pub const MAX_BLOCKS: usize = 65535;

/// Largest datagram this protocol ever sends or expects: 4-byte header +
/// MAX_PAYLOAD.
pub const DATAGRAM_BUF: usize = 4 + MAX_PAYLOAD;

const OPCODE_RRQ: u16 = 1;
const OPCODE_WRQ: u16 = 2;
const OPCODE_DATA: u16 = 3;
const OPCODE_ACK: u16 = 4;
const OPCODE_ERROR: u16 = 5;

/// Which packet shape a caller expects when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Rrq,
    Wrq,
    Data,
    Ack,
    Error,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("packet too short or fields missing")]
    Malformed,
    #[error("expected opcode {expected}, got {got}")]
    WrongOpCode { expected: u16, got: u16 },
    #[error("payload of {len} octets exceeds MAX_PAYLOAD ({MAX_PAYLOAD})")]
    PayloadTooBig { len: usize },
}

/// A fully parsed TFTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rrq { filename: String, mode: String },
    Wrq { filename: String, mode: String },
    Data { block_num: u16, payload: Vec<u8> },
    Ack { block_num: u16 },
    Error { code: u16, msg: String },
}

impl Packet {
    pub fn kind(&self) -> Kind {
        match self {
            Packet::Rrq { .. } => Kind::Rrq,
            Packet::Wrq { .. } => Kind::Wrq,
            Packet::Data { .. } => Kind::Data,
            Packet::Ack { .. } => Kind::Ack,
            Packet::Error { .. } => Kind::Error,
        }
    }

    /// Serialize to bytes ready for transmission.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        match self {
            Packet::Rrq { filename, mode } => Ok(encode_request(OPCODE_RRQ, filename, mode)),
            Packet::Wrq { filename, mode } => Ok(encode_request(OPCODE_WRQ, filename, mode)),
            Packet::Data { block_num, payload } => {
                if payload.len() > MAX_PAYLOAD {
                    return Err(WireError::PayloadTooBig { len: payload.len() });
                }
                let mut buf = Vec::with_capacity(4 + payload.len());
                buf.extend_from_slice(&OPCODE_DATA.to_be_bytes());
                buf.extend_from_slice(&block_num.to_be_bytes());
                buf.extend_from_slice(payload);
                Ok(buf)
            }
            Packet::Ack { block_num } => {
                let mut buf = Vec::with_capacity(4);
                buf.extend_from_slice(&OPCODE_ACK.to_be_bytes());
                buf.extend_from_slice(&block_num.to_be_bytes());
                Ok(buf)
            }
            Packet::Error { code, msg } => {
                let mut buf = Vec::with_capacity(5 + msg.len());
                buf.extend_from_slice(&OPCODE_ERROR.to_be_bytes());
                buf.extend_from_slice(&code.to_be_bytes());
                buf.extend_from_slice(msg.as_bytes());
                buf.push(0);
                Ok(buf)
            }
        }
    }

    /// Decode `buf` as the given `kind`. Fails with `WrongOpCode` if the
    /// leading opcode doesn't match what the caller expects.
    pub fn decode_as(kind: Kind, buf: &[u8]) -> Result<Packet, WireError> {
        let opcode = peek_opcode(buf)?;
        match kind {
            Kind::Rrq => decode_request(buf, opcode, OPCODE_RRQ, true),
            Kind::Wrq => decode_request(buf, opcode, OPCODE_WRQ, false),
            Kind::Data => decode_data(buf, opcode),
            Kind::Ack => decode_ack(buf, opcode),
            Kind::Error => decode_error(buf, opcode),
        }
    }

    /// Decode without knowing the shape in advance; dispatches on the
    /// leading opcode.
    pub fn decode_any(buf: &[u8]) -> Result<Packet, WireError> {
        match peek_opcode(buf)? {
            OPCODE_RRQ => decode_request(buf, OPCODE_RRQ, OPCODE_RRQ, true),
            OPCODE_WRQ => decode_request(buf, OPCODE_WRQ, OPCODE_WRQ, false),
            OPCODE_DATA => decode_data(buf, OPCODE_DATA),
            OPCODE_ACK => decode_ack(buf, OPCODE_ACK),
            OPCODE_ERROR => decode_error(buf, OPCODE_ERROR),
            got => Err(WireError::WrongOpCode { expected: 0, got }),
        }
    }
}

/// Read the first two big-endian octets as an opcode without decoding the
/// rest of the packet.
pub fn peek_opcode(buf: &[u8]) -> Result<u16, WireError> {
    if buf.len() < 2 {
        return Err(WireError::Malformed);
    }
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

fn encode_request(opcode: u16, filename: &str, mode: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + filename.len() + mode.len());
    buf.extend_from_slice(&opcode.to_be_bytes());
    buf.extend_from_slice(filename.as_bytes());
    buf.push(0);
    buf.extend_from_slice(mode.as_bytes());
    buf.push(0);
    buf
}

fn decode_request(buf: &[u8], opcode: u16, expected: u16, is_rrq: bool) -> Result<Packet, WireError> {
    if opcode != expected {
        return Err(WireError::WrongOpCode { expected, got: opcode });
    }
    let payload = &buf[2..];
    let mut fields = payload.splitn(2, |&b| b == 0);
    let filename = fields.next().ok_or(WireError::Malformed)?;
    let rest = fields.next().ok_or(WireError::Malformed)?;
    let mode_raw = rest.split(|&b| b == 0).next().ok_or(WireError::Malformed)?;

    let filename = String::from_utf8_lossy(filename).into_owned();
    if filename.is_empty() {
        return Err(WireError::Malformed);
    }
    let mode = String::from_utf8_lossy(mode_raw).into_owned();
    if mode.is_empty() {
        return Err(WireError::Malformed);
    }

    if is_rrq {
        Ok(Packet::Rrq { filename, mode })
    } else {
        Ok(Packet::Wrq { filename, mode })
    }
}

fn decode_data(buf: &[u8], opcode: u16) -> Result<Packet, WireError> {
    if opcode != OPCODE_DATA {
        return Err(WireError::WrongOpCode { expected: OPCODE_DATA, got: opcode });
    }
    if buf.len() < 4 {
        return Err(WireError::Malformed);
    }
    let block_num = u16::from_be_bytes([buf[2], buf[3]]);
    let payload = buf[4..].to_vec();
    if payload.len() > MAX_PAYLOAD {
        return Err(WireError::PayloadTooBig { len: payload.len() });
    }
    Ok(Packet::Data { block_num, payload })
}

fn decode_ack(buf: &[u8], opcode: u16) -> Result<Packet, WireError> {
    if opcode != OPCODE_ACK {
        return Err(WireError::WrongOpCode { expected: OPCODE_ACK, got: opcode });
    }
    if buf.len() < 4 {
        return Err(WireError::Malformed);
    }
    let block_num = u16::from_be_bytes([buf[2], buf[3]]);
    Ok(Packet::Ack { block_num })
}

fn decode_error(buf: &[u8], opcode: u16) -> Result<Packet, WireError> {
    if opcode != OPCODE_ERROR {
        return Err(WireError::WrongOpCode { expected: OPCODE_ERROR, got: opcode });
    }
    if buf.len() < 4 {
        return Err(WireError::Malformed);
    }
    let code = u16::from_be_bytes([buf[2], buf[3]]);
    let msg_bytes = &buf[4..];
    let end = msg_bytes.iter().position(|&b| b == 0).unwrap_or(msg_bytes.len());
    let msg = String::from_utf8_lossy(&msg_bytes[..end]).into_owned();
    Ok(Packet::Error { code, msg })
}

/// Numeric TFTP error codes (spec.md §3).
pub mod error_code {
    pub const UNDEFINED: u16 = 0;
    pub const FILE_NOT_FOUND: u16 = 1;
    pub const ACCESS_VIOLATION: u16 = 2;
    pub const DISK_FULL: u16 = 3;
    pub const ILLEGAL_OP: u16 = 4;
    pub const UNKNOWN_TID: u16 = 5;
    pub const FILE_ALREADY_EXISTS: u16 = 6;
    pub const NO_SUCH_USER: u16 = 7;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_rrq() {
        let pkt = Packet::Rrq { filename: "hello.txt".into(), mode: "octet".into() };
        let bytes = pkt.encode().unwrap();
        assert_eq!(Packet::decode_as(Kind::Rrq, &bytes).unwrap(), pkt);
    }

    #[test]
    fn round_trip_wrq() {
        let pkt = Packet::Wrq { filename: "upload.bin".into(), mode: "octet".into() };
        let bytes = pkt.encode().unwrap();
        assert_eq!(Packet::decode_as(Kind::Wrq, &bytes).unwrap(), pkt);
    }

    #[test]
    fn round_trip_data() {
        let pkt = Packet::Data { block_num: 42, payload: vec![1, 2, 3] };
        let bytes = pkt.encode().unwrap();
        assert_eq!(Packet::decode_as(Kind::Data, &bytes).unwrap(), pkt);
    }

    #[test]
    fn round_trip_data_empty_payload() {
        let pkt = Packet::Data { block_num: 7, payload: vec![] };
        let bytes = pkt.encode().unwrap();
        assert_eq!(Packet::decode_as(Kind::Data, &bytes).unwrap(), pkt);
    }

    #[test]
    fn round_trip_ack() {
        let pkt = Packet::Ack { block_num: 7 };
        let bytes = pkt.encode().unwrap();
        assert_eq!(Packet::decode_as(Kind::Ack, &bytes).unwrap(), pkt);
    }

    #[test]
    fn round_trip_error() {
        let pkt = Packet::Error { code: 1, msg: "File not found".into() };
        let bytes = pkt.encode().unwrap();
        assert_eq!(Packet::decode_as(Kind::Error, &bytes).unwrap(), pkt);
    }

    #[test]
    fn data_payload_too_big_rejected_on_encode() {
        let pkt = Packet::Data { block_num: 1, payload: vec![0u8; MAX_PAYLOAD + 1] };
        assert_eq!(pkt.encode(), Err(WireError::PayloadTooBig { len: MAX_PAYLOAD + 1 }));
    }

    #[test]
    fn wrong_opcode_is_rejected() {
        let ack = Packet::Ack { block_num: 1 }.encode().unwrap();
        assert_eq!(
            Packet::decode_as(Kind::Data, &ack),
            Err(WireError::WrongOpCode { expected: OPCODE_DATA, got: OPCODE_ACK })
        );
    }

    #[test]
    fn truncated_datagram_is_malformed() {
        assert_eq!(Packet::decode_as(Kind::Ack, &[0, 4]), Err(WireError::Malformed));
        assert_eq!(Packet::decode_as(Kind::Data, &[0, 3, 0]), Err(WireError::Malformed));
        assert_eq!(Packet::decode_as(Kind::Rrq, &[0, 1]), Err(WireError::Malformed));
    }

    #[test]
    fn empty_filename_is_malformed() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.push(0);
        buf.extend_from_slice(b"octet\0");
        assert_eq!(Packet::decode_as(Kind::Rrq, &buf), Err(WireError::Malformed));
    }

    #[test]
    fn peek_opcode_reads_leading_two_octets() {
        let pkt = Packet::Ack { block_num: 9 }.encode().unwrap();
        assert_eq!(peek_opcode(&pkt).unwrap(), OPCODE_ACK);
    }

    #[test]
    fn decode_any_dispatches_on_opcode() {
        let pkt = Packet::Error { code: 5, msg: "unknown transfer id".into() };
        let bytes = pkt.encode().unwrap();
        assert_eq!(Packet::decode_any(&bytes).unwrap(), pkt);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::collection::vec as byte_vec;
    use proptest::prelude::*;

    fn ascii_filename() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_./-]{1,64}"
    }

    proptest! {
        // spec.md §8.1: decode_as(kind(P), encode(P)) == P for every variant.
        #[test]
        fn rrq_wrq_round_trip(filename in ascii_filename(), is_rrq in any::<bool>()) {
            let pkt = if is_rrq {
                Packet::Rrq { filename, mode: "octet".into() }
            } else {
                Packet::Wrq { filename, mode: "octet".into() }
            };
            let bytes = pkt.encode().unwrap();
            prop_assert_eq!(Packet::decode_as(pkt.kind(), &bytes).unwrap(), pkt);
        }

        #[test]
        fn data_round_trip(block_num in any::<u16>(), payload in byte_vec(any::<u8>(), 0..=MAX_PAYLOAD)) {
            let pkt = Packet::Data { block_num, payload };
            let bytes = pkt.encode().unwrap();
            prop_assert_eq!(Packet::decode_as(Kind::Data, &bytes).unwrap(), pkt);
        }

        #[test]
        fn ack_round_trip(block_num in any::<u16>()) {
            let pkt = Packet::Ack { block_num };
            let bytes = pkt.encode().unwrap();
            prop_assert_eq!(Packet::decode_as(Kind::Ack, &bytes).unwrap(), pkt);
        }

        #[test]
        fn error_round_trip(code in any::<u16>(), msg in "[a-zA-Z0-9 ]{0,64}") {
            let pkt = Packet::Error { code, msg };
            let bytes = pkt.encode().unwrap();
            prop_assert_eq!(Packet::decode_as(Kind::Error, &bytes).unwrap(), pkt);
        }

        // Any octet string that fails to decode must fail with Malformed or
        // WrongOpCode, never panic (spec.md §8.1).
        #[test]
        fn arbitrary_bytes_never_panic_on_decode(bytes in byte_vec(any::<u8>(), 0..32)) {
            for kind in [Kind::Rrq, Kind::Wrq, Kind::Data, Kind::Ack, Kind::Error] {
                if let Err(e) = Packet::decode_as(kind, &bytes) {
                    prop_assert!(matches!(e, WireError::Malformed | WireError::WrongOpCode { .. }));
                }
            }
        }
    }
}

//! Reply header encoding and decoding
// (c) 2025 Ross Younger

use bytes::{Buf as _, BufMut as _};
use static_assertions::const_assert_eq;

/// The fixed tag that starts a positive reply
pub const OK_TAG: &[u8; 5] = b"+OK\r\n";
/// The complete negative reply
pub const ERR_REPLY: &[u8; 6] = b"-ERR\r\n";

/// Total length of a positive reply header (tag, size, mtime)
pub const OK_HEADER_LEN: usize = 13;
/// Bytes following the status byte in a positive reply header
pub const OK_TRAILER_LEN: usize = OK_HEADER_LEN - 1;
/// Bytes following the status byte in a negative reply
pub const ERR_TRAILER_LEN: usize = 5;

const_assert_eq!(OK_HEADER_LEN, 5 + 4 + 4);
const_assert_eq!(ERR_TRAILER_LEN + 1, 6);

/// The first byte of a reply, as seen by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Status {
    /// A positive reply header follows
    #[display("OK")]
    Ok,
    /// A negative reply follows; the server will close the connection
    #[display("ERR")]
    Err,
    /// Protocol violation
    #[display("unknown status byte {_0:#04x}")]
    Unknown(u8),
}

impl Status {
    /// How many more bytes the client must read to complete the header
    #[must_use]
    pub fn trailer_len(self) -> Option<usize> {
        match self {
            Status::Ok => Some(OK_TRAILER_LEN),
            Status::Err => Some(ERR_TRAILER_LEN),
            Status::Unknown(_) => None,
        }
    }
}

/// Classifies the first byte of a reply.
#[must_use]
pub fn decode_status_byte(byte: u8) -> Status {
    match byte {
        b'+' => Status::Ok,
        b'-' => Status::Err,
        other => Status::Unknown(other),
    }
}

/// A positive reply header could not be understood
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// The bytes after the status byte were not `OK\r\n`
    #[error("malformed positive reply header")]
    BadTag,
}

/// The metadata carried by a positive reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Constructor)]
pub struct OkHeader {
    /// Length of the file contents that follow
    pub size: u32,
    /// File modification time, seconds since the Unix epoch
    pub mtime: u32,
}

impl OkHeader {
    /// Wire representation
    #[must_use]
    pub fn encode(&self) -> [u8; OK_HEADER_LEN] {
        let mut out = [0u8; OK_HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_slice(OK_TAG);
        buf.put_u32(self.size);
        buf.put_u32(self.mtime);
        out
    }

    /// Decodes the part of a positive reply that follows the status byte.
    pub fn decode_trailer(trailer: &[u8; OK_TRAILER_LEN]) -> Result<Self, HeaderError> {
        let (tag, mut rest) = trailer.split_at(OK_TAG.len() - 1);
        if tag != &OK_TAG[1..] {
            return Err(HeaderError::BadTag);
        }
        let size = rest.get_u32();
        let mtime = rest.get_u32();
        Ok(Self { size, mtime })
    }
}

/// Wire representation of a positive reply header
#[must_use]
pub fn encode_ok_header(size: u32, mtime: u32) -> [u8; OK_HEADER_LEN] {
    OkHeader::new(size, mtime).encode()
}

/// Wire representation of a negative reply
#[must_use]
pub fn encode_err_header() -> &'static [u8; 6] {
    ERR_REPLY
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{
        ERR_TRAILER_LEN, HeaderError, OK_TRAILER_LEN, OkHeader, Status, decode_status_byte,
        encode_err_header, encode_ok_header,
    };

    #[test]
    fn ok_header_layout() {
        let header = encode_ok_header(6, 0x0102_0304);
        assert_eq!(
            header,
            [b'+', b'O', b'K', b'\r', b'\n', 0, 0, 0, 6, 1, 2, 3, 4]
        );
    }

    #[rstest]
    #[case(0, 0)]
    #[case(u32::MAX, u32::MAX)]
    #[case(0, u32::MAX)]
    #[case(u32::MAX, 0)]
    #[case(123_456, 1_700_000_000)]
    fn ok_header_round_trip(#[case] size: u32, #[case] mtime: u32) {
        let header = OkHeader::new(size, mtime);
        let wire = header.encode();
        assert_eq!(decode_status_byte(wire[0]), Status::Ok);
        let trailer: [u8; OK_TRAILER_LEN] = wire[1..].try_into().unwrap();
        let decoded = OkHeader::decode_trailer(&trailer).unwrap();
        assert_eq!(decoded, header);
        assert_eq!((decoded.size, decoded.mtime), (size, mtime));
    }

    #[test]
    fn bad_trailer_tag() {
        let mut trailer = [0u8; OK_TRAILER_LEN];
        trailer[..4].copy_from_slice(b"OX\r\n");
        assert_eq!(OkHeader::decode_trailer(&trailer), Err(HeaderError::BadTag));
    }

    #[test]
    fn err_reply_is_six_bytes() {
        let reply = encode_err_header();
        assert_eq!(reply, b"-ERR\r\n");
        assert_eq!(decode_status_byte(reply[0]), Status::Err);
        assert_eq!(reply.len() - 1, ERR_TRAILER_LEN);
    }

    #[rstest]
    #[case(b'+', Some(OK_TRAILER_LEN))]
    #[case(b'-', Some(ERR_TRAILER_LEN))]
    #[case(b'?', None)]
    #[case(0, None)]
    fn trailer_lengths(#[case] byte: u8, #[case] expected: Option<usize>) {
        assert_eq!(decode_status_byte(byte).trailer_len(), expected);
    }

    #[test]
    fn unknown_status_display() {
        assert_eq!(Status::Unknown(0x3f).to_string(), "unknown status byte 0x3f");
    }
}

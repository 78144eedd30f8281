//! Request line encoding and decoding
// (c) 2025 Ross Younger

use tracing::debug;

/// The longest filename a request may carry (the customary platform `NAME_MAX`)
pub const MAX_FILENAME_LEN: usize = 255;

/// The number of bytes the server is prepared to scan after `GET ` while
/// looking for the end of the request line.
pub const REQUEST_LINE_BUDGET: usize = MAX_FILENAME_LEN + 7;

/// Every `GET` request starts with these bytes
pub const GET_PREFIX: &[u8; 4] = b"GET ";
/// The `QUIT` command word
pub const QUIT_COMMAND: &[u8; 4] = b"QUIT";
/// Request line terminator
pub const CRLF: &[u8; 2] = b"\r\n";
/// A complete `QUIT` request
pub const QUIT_REQUEST: &[u8; 6] = b"QUIT\r\n";

/// A decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Retrieve the named file
    Get(Vec<u8>),
    /// The client has finished
    Quit,
    /// Anything else
    Malformed,
}

/// Reasons a filename cannot be placed in a request line
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The filename was empty
    #[error("filename is empty")]
    EmptyFilename,
    /// The filename does not fit in the request line budget
    #[error("filename is too long ({0} bytes; the limit is {MAX_FILENAME_LEN})")]
    FilenameTooLong(usize),
    /// The filename would break the request framing
    #[error("filename contains a line terminator")]
    LineTerminator,
}

/// Builds the request line for a `GET`.
pub fn encode_request(filename: &[u8]) -> Result<Vec<u8>, CodecError> {
    if filename.is_empty() {
        return Err(CodecError::EmptyFilename);
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(CodecError::FilenameTooLong(filename.len()));
    }
    if filename.iter().any(|b| *b == b'\r' || *b == b'\n') {
        return Err(CodecError::LineTerminator);
    }
    let mut line = Vec::with_capacity(GET_PREFIX.len() + filename.len() + CRLF.len());
    line.extend_from_slice(GET_PREFIX);
    line.extend_from_slice(filename);
    line.extend_from_slice(CRLF);
    Ok(line)
}

/// Decodes a complete request line held in memory.
///
/// Only the literal `QUIT\r\n` is a `QUIT`. A `GET` whose terminator does
/// not appear within [`REQUEST_LINE_BUDGET`] bytes yields the first
/// [`REQUEST_LINE_BUDGET`] bytes as its filename.
#[must_use]
pub fn decode_request_line(line: &[u8]) -> Request {
    let Some((command, rest)) = line.split_first_chunk::<4>() else {
        return Request::Malformed;
    };
    if line.starts_with(QUIT_REQUEST) {
        Request::Quit
    } else if command == GET_PREFIX {
        let window = &rest[..rest.len().min(REQUEST_LINE_BUDGET)];
        let filename = window
            .windows(CRLF.len())
            .position(|w| w == CRLF)
            .map_or(window, |end| &window[..end]);
        Request::Get(filename.to_vec())
    } else {
        Request::Malformed
    }
}

/// Looks for one complete request at the front of `buf`, which holds
/// whatever has arrived on a connection so far.
///
/// Returns the request and the number of bytes it occupied, or `None` if more
/// input is needed. A `GET` is complete once its terminator arrives, or once
/// [`REQUEST_LINE_BUDGET`] bytes have followed the prefix without one; in that
/// case the filename is truncated as by [`decode_request_line`] and the
/// remaining bytes are left for the next call. Anything that does not start
/// with a known command is reported as malformed as soon as four bytes are
/// available.
#[must_use]
pub fn parse_request(buf: &[u8]) -> Option<(Request, usize)> {
    let (command, rest) = buf.split_first_chunk::<4>()?;
    let used = if command == QUIT_COMMAND {
        if rest.len() < CRLF.len() {
            return None;
        }
        QUIT_REQUEST.len()
    } else if command == GET_PREFIX {
        let window = &rest[..rest.len().min(REQUEST_LINE_BUDGET)];
        match window.windows(CRLF.len()).position(|w| w == CRLF) {
            Some(end) => GET_PREFIX.len() + end + CRLF.len(),
            None if window.len() == REQUEST_LINE_BUDGET => {
                debug!(
                    "request line exceeded {REQUEST_LINE_BUDGET} bytes without a terminator; truncating filename"
                );
                GET_PREFIX.len() + REQUEST_LINE_BUDGET
            }
            None => return None,
        }
    } else {
        return Some((Request::Malformed, command.len()));
    };
    Some((decode_request_line(&buf[..used]), used))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{
        CodecError, MAX_FILENAME_LEN, REQUEST_LINE_BUDGET, Request, decode_request_line,
        encode_request, parse_request,
    };

    #[rstest]
    #[case(b"a.txt".as_slice())]
    #[case(b"dir/sub dir/file with spaces".as_slice())]
    #[case(b"\xc3\xa9t\xc3\xa9.bin".as_slice())]
    #[case(&[b'x'; MAX_FILENAME_LEN])]
    fn request_round_trip(#[case] name: &[u8]) {
        let line = encode_request(name).unwrap();
        assert_eq!(decode_request_line(&line), Request::Get(name.to_vec()));
        assert_eq!(
            parse_request(&line),
            Some((Request::Get(name.to_vec()), line.len()))
        );
    }

    #[test]
    fn encoding_layout() {
        assert_eq!(encode_request(b"a.txt").unwrap(), b"GET a.txt\r\n");
    }

    #[test]
    fn encode_rejects_bad_names() {
        assert_eq!(encode_request(b""), Err(CodecError::EmptyFilename));
        assert_eq!(
            encode_request(&[b'x'; MAX_FILENAME_LEN + 1]),
            Err(CodecError::FilenameTooLong(MAX_FILENAME_LEN + 1))
        );
        assert_eq!(encode_request(b"a\r\nb"), Err(CodecError::LineTerminator));
        assert_eq!(encode_request(b"a\nb"), Err(CodecError::LineTerminator));
    }

    #[rstest]
    #[case(b"QUIT\r\n".as_slice(), Request::Quit)]
    #[case(b"QUITxyz\r\n".as_slice(), Request::Malformed)]
    #[case(b"QUIT".as_slice(), Request::Malformed)]
    #[case(b"PUT a.txt\r\n".as_slice(), Request::Malformed)]
    #[case(b"get a.txt\r\n".as_slice(), Request::Malformed)]
    #[case(b"GE".as_slice(), Request::Malformed)]
    #[case(b"".as_slice(), Request::Malformed)]
    fn decode_other_lines(#[case] line: &[u8], #[case] expected: Request) {
        assert_eq!(decode_request_line(line), expected);
    }

    #[test]
    fn decode_truncates_when_budget_exhausted() {
        let mut line = b"GET ".to_vec();
        line.extend(std::iter::repeat_n(b'y', REQUEST_LINE_BUDGET + 40));
        let Request::Get(name) = decode_request_line(&line) else {
            panic!("expected a GET");
        };
        assert_eq!(name.len(), REQUEST_LINE_BUDGET);
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"GE".as_slice())]
    #[case(b"GET ".as_slice())]
    #[case(b"GET half-a-na".as_slice())]
    #[case(b"GET name\r".as_slice())]
    #[case(b"QUIT".as_slice())]
    #[case(b"QUIT\r".as_slice())]
    fn parse_waits_for_more(#[case] buf: &[u8]) {
        assert_eq!(parse_request(buf), None);
    }

    #[rstest]
    #[case(b"QUIT\r\n".as_slice(), Request::Quit, 6)]
    #[case(b"QUITxy".as_slice(), Request::Malformed, 6)]
    #[case(b"PUT a\r\n".as_slice(), Request::Malformed, 4)]
    #[case(b"GET a\nb\r\n".as_slice(), Request::Get(b"a\nb".to_vec()), 9)]
    fn parse_complete(#[case] buf: &[u8], #[case] expected: Request, #[case] used: usize) {
        assert_eq!(parse_request(buf), Some((expected, used)));
    }

    #[test]
    fn parse_one_request_at_a_time() {
        let wire = b"GET a\r\nGET b\r\nQUIT\r\n";
        let (first, n1) = parse_request(wire).unwrap();
        assert_eq!(first, Request::Get(b"a".to_vec()));
        let (second, n2) = parse_request(&wire[n1..]).unwrap();
        assert_eq!(second, Request::Get(b"b".to_vec()));
        let (third, n3) = parse_request(&wire[n1 + n2..]).unwrap();
        assert_eq!(third, Request::Quit);
        assert_eq!(n1 + n2 + n3, wire.len());
    }

    #[test]
    fn parse_truncation_leaves_remainder() {
        let mut wire = b"GET ".to_vec();
        wire.extend(std::iter::repeat_n(b'z', REQUEST_LINE_BUDGET));
        // not yet: the budget is full but nothing follows
        assert!(parse_request(&wire[..wire.len() - 1]).is_none());
        wire.extend_from_slice(b"tail\r\n");
        let (request, used) = parse_request(&wire).unwrap();
        let Request::Get(name) = request else {
            panic!("expected a GET");
        };
        assert_eq!(name.len(), REQUEST_LINE_BUDGET);
        assert_eq!(used, 4 + REQUEST_LINE_BUDGET);
        // The leftover bytes are read as the next (malformed) command.
        assert_eq!(
            parse_request(&wire[used..]),
            Some((Request::Malformed, 4))
        );
    }
}

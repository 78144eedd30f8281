// (c) 2025 Ross Younger

//! The tfx wire protocol
//!
//! The protocol is a text/binary hybrid carried over a single TCP connection.
//! The client sends one request line at a time; the server answers each `GET`
//! with either a positive or a negative reply.
//!
//! # Requests (client ➡️ server)
//!
//! | Request | Bytes |
//! |---|---|
//! | retrieve a file | `GET <filename>\r\n` |
//! | finish the session | `QUIT\r\n` |
//!
//! Filenames are opaque byte strings of at most [`MAX_FILENAME_LEN`] bytes.
//! The server scans at most [`REQUEST_LINE_BUDGET`] bytes looking for the
//! terminating `\r\n`. If it does not find one, the filename is truncated to
//! whatever was read and the remaining bytes are interpreted as the next request.
//!
//! # Replies (server ➡️ client)
//!
//! | Reply | Bytes |
//! |---|---|
//! | positive | `+OK\r\n`, `u32` file size, `u32` modification time (seconds since the Unix epoch), file contents |
//! | negative | `-ERR\r\n` (the server then closes the connection) |
//!
//! All multi-byte integers are big-endian. The file contents immediately follow
//! the positive header and may be split across any number of TCP segments.
//!
//! A client reads a single status byte first: `+` means 12 more header bytes
//! follow, `-` means 5 more bytes follow. Anything else is a protocol violation.
//!
//! Files of 4GiB or more, and files whose modification time does not fit in
//! 32 bits, cannot be served; requesting one yields a negative reply.

mod request;
mod response;

pub use request::{
    CRLF, CodecError, GET_PREFIX, MAX_FILENAME_LEN, QUIT_COMMAND, QUIT_REQUEST,
    REQUEST_LINE_BUDGET, Request, decode_request_line, encode_request, parse_request,
};
pub use response::{
    ERR_REPLY, ERR_TRAILER_LEN, HeaderError, OK_HEADER_LEN, OK_TAG, OK_TRAILER_LEN, OkHeader,
    Status, decode_status_byte, encode_err_header, encode_ok_header,
};

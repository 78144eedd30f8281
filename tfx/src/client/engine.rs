//! Client transfer engine
// (c) 2025 Ross Younger

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, UNIX_EPOCH};

use human_repr::{HumanCount as _, HumanThroughput as _};
use tracing::{debug, error, info, warn};

use crate::protocol::{
    CodecError, ERR_TRAILER_LEN, HeaderError, OK_TRAILER_LEN, OkHeader, QUIT_REQUEST, Status,
    decode_status_byte, encode_request,
};
use crate::util::io::wait_readable;

/// Fatal client-side failures
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server went quiet for too long
    #[error("server is taking too long to reply (no data for {0:?})")]
    Stalled(Duration),
    /// The server sent something that isn't a reply
    #[error("protocol violation: {0}")]
    Protocol(Status),
    /// The positive reply header was malformed
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// The server closed the connection part way through a reply
    #[error("server closed the connection unexpectedly")]
    PrematureClose,
    /// A downloaded file could not be written
    #[error("could not write {path}: {source}")]
    Output {
        /// Where we were writing
        path: PathBuf,
        /// What went wrong
        source: std::io::Error,
    },
    /// Socket failure
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client engine options
#[derive(Debug, Clone)]
pub struct Options {
    /// Where downloaded files are written
    pub output_dir: PathBuf,
    /// Apply the server's modification time to downloaded files
    pub preserve: bool,
    /// Readiness wait timeout
    pub timeout: Duration,
    /// Consecutive timeouts tolerated
    pub attempts: u32,
    /// Receive chunk size
    pub chunk: usize,
}

/// What became of one requested file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileResult {
    /// Downloaded successfully
    Received {
        /// Where it was written
        path: PathBuf,
        /// Bytes written
        size: u32,
        /// The server-side modification time (seconds since the Unix epoch)
        mtime: u32,
    },
    /// The server replied with an error
    ServerError(String),
    /// The name could not be requested
    Skipped(String),
}

/// Outcome of a complete session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// One entry per requested name, in order
    pub files: Vec<(String, FileResult)>,
}

impl Summary {
    /// Number of files successfully received
    #[must_use]
    pub fn received(&self) -> usize {
        self.files
            .iter()
            .filter(|(_, r)| matches!(r, FileResult::Received { .. }))
            .count()
    }
}

/// Runs a whole session over an established connection.
///
/// Each name is requested in turn. Names that cannot be encoded are reported
/// and skipped.
///
/// A negative reply stops the session. The client does not go on to the
/// next filename: the server closes the connection after sending `-ERR`, so
/// every remaining name is left unrequested and reported as
/// [`FileResult::Skipped`]. Finally `QUIT` is sent; failure to send it is
/// ignored.
///
/// Server-reported errors are not fatal. Transport failures, stalls,
/// protocol violations and local file errors are.
pub fn run_session<S: Read + Write + AsFd>(
    stream: &mut S,
    names: &[String],
    options: &Options,
) -> Result<Summary, ClientError> {
    let mut summary = Summary::default();
    let mut session_open = true;

    for raw in names {
        let name = raw.trim().to_string();
        if !session_open {
            warn!("{name}: not requested; the server has closed the session");
            summary
                .files
                .push((name, FileResult::Skipped("session closed".into())));
            continue;
        }
        let request = match request_for(&name) {
            Ok(r) => r,
            Err(e) => {
                error!("{name}: {e}");
                summary.files.push((name, FileResult::Skipped(e.to_string())));
                continue;
            }
        };
        stream.write_all(&request)?;
        stream.flush()?;

        let result = receive_reply(stream, &name, options)?;
        if matches!(result, FileResult::ServerError(_)) {
            session_open = false;
        }
        summary.files.push((name, result));
    }

    if let Err(e) = stream.write_all(QUIT_REQUEST).and_then(|()| stream.flush()) {
        debug!("sending QUIT: {e}");
    }
    Ok(summary)
}

fn request_for(name: &str) -> Result<Vec<u8>, CodecError> {
    encode_request(name.as_bytes())
}

fn receive_reply<S: Read + AsFd>(
    stream: &mut S,
    name: &str,
    options: &Options,
) -> Result<FileResult, ClientError> {
    let mut status = [0u8; 1];
    read_exact_patiently(stream, &mut status, options)?;
    match decode_status_byte(status[0]) {
        Status::Ok => {
            let mut trailer = [0u8; OK_TRAILER_LEN];
            read_exact_patiently(stream, &mut trailer, options)?;
            let header = OkHeader::decode_trailer(&trailer)?;
            let path = output_path(&options.output_dir, name)?;
            download(stream, &path, header, options)?;
            Ok(FileResult::Received {
                path,
                size: header.size,
                mtime: header.mtime,
            })
        }
        Status::Err => {
            let mut trailer = [0u8; ERR_TRAILER_LEN];
            read_exact_patiently(stream, &mut trailer, options)?;
            let text = String::from_utf8_lossy(&trailer).trim_end().to_string();
            error!("{name}: server returned error: {text}");
            Ok(FileResult::ServerError(text))
        }
        other @ Status::Unknown(_) => Err(ClientError::Protocol(other)),
    }
}

/// Downloaded files are named after the final component of the requested name.
fn output_path(dir: &Path, name: &str) -> Result<PathBuf, ClientError> {
    Path::new(name)
        .file_name()
        .map(|f| dir.join(f))
        .ok_or_else(|| ClientError::Output {
            path: PathBuf::from(name),
            source: std::io::Error::new(ErrorKind::InvalidInput, "no file name component"),
        })
}

/// Blocks until the stream is readable, giving up after `attempts` consecutive timeouts.
fn wait_for_data<S: AsFd>(stream: &S, options: &Options) -> Result<(), ClientError> {
    let mut misses = 0;
    while !wait_readable(stream, options.timeout)? {
        misses += 1;
        if misses >= options.attempts {
            return Err(ClientError::Stalled(
                options.timeout.saturating_mul(options.attempts),
            ));
        }
        debug!("no data from server after {:?}; waiting again", options.timeout);
    }
    Ok(())
}

/// Reads once from the stream after waiting for it to become readable.
fn read_some<S: Read + AsFd>(
    stream: &mut S,
    buf: &mut [u8],
    options: &Options,
) -> Result<usize, ClientError> {
    loop {
        wait_for_data(stream, options)?;
        match stream.read(buf) {
            Ok(0) => return Err(ClientError::PrematureClose),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted || e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
    }
}

fn read_exact_patiently<S: Read + AsFd>(
    stream: &mut S,
    buf: &mut [u8],
    options: &Options,
) -> Result<(), ClientError> {
    let mut filled = 0;
    while filled < buf.len() {
        filled += read_some(stream, &mut buf[filled..], options)?;
    }
    Ok(())
}

fn download<S: Read + AsFd>(
    stream: &mut S,
    path: &Path,
    header: OkHeader,
    options: &Options,
) -> Result<(), ClientError> {
    let output_error = |source| ClientError::Output {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(output_error)?;
    let mut buf = vec![0u8; options.chunk.max(1)];
    let mut remaining = usize::try_from(header.size).unwrap_or(usize::MAX);
    let start = Instant::now();

    while remaining > 0 {
        let want = remaining.min(buf.len());
        let n = read_some(stream, &mut buf[..want], options)?;
        file.write_all(&buf[..n]).map_err(output_error)?;
        file.flush().map_err(output_error)?;
        remaining -= n;
    }

    if options.preserve {
        let mtime = UNIX_EPOCH + Duration::from_secs(header.mtime.into());
        file.set_modified(mtime).map_err(output_error)?;
    }
    report(path, header, start.elapsed());
    Ok(())
}

fn report(path: &Path, header: OkHeader, elapsed: Duration) {
    let modified = chrono::DateTime::from_timestamp(header.mtime.into(), 0).map_or_else(
        || "unknown".to_string(),
        |t| {
            t.with_timezone(&chrono::Local)
                .format("%a %b %e %T %Y")
                .to_string()
        },
    );
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        (f64::from(header.size) / secs).human_throughput_bytes().to_string()
    } else {
        "-".to_string()
    };
    info!(
        "Written {} to {} (last modified {modified}; {rate})",
        header.size.human_count_bytes(),
        path.display(),
    );
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::io::{BufRead as _, BufReader, Read as _, Write as _};
    use std::os::unix::net::UnixStream;
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use pretty_assertions::assert_eq;

    use super::{ClientError, FileResult, Options, run_session};
    use crate::protocol::{Status, encode_ok_header};

    fn options(dir: &Path) -> Options {
        Options {
            output_dir: dir.to_path_buf(),
            preserve: false,
            timeout: Duration::from_millis(200),
            attempts: 2,
            chunk: 4,
        }
    }

    /// A scripted server: for each expected request line, sends the canned reply.
    fn fake_server(
        mut sock: UnixStream,
        script: Vec<(&'static str, Vec<u8>)>,
    ) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut seen = Vec::new();
            let mut reader = BufReader::new(sock.try_clone().unwrap());
            for (expected, reply) in script {
                let mut line = String::new();
                let _ = reader.read_line(&mut line).unwrap();
                assert_eq!(line, expected);
                seen.push(line);
                sock.write_all(&reply).unwrap();
            }
            let mut rest = String::new();
            let _ = reader.read_to_string(&mut rest);
            seen.push(rest);
            seen
        })
    }

    fn ok_reply(contents: &[u8], mtime: u32) -> Vec<u8> {
        let mut v = encode_ok_header(u32::try_from(contents.len()).unwrap(), mtime).to_vec();
        v.extend_from_slice(contents);
        v
    }

    #[test]
    fn receives_then_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(
            server,
            vec![
                ("GET a.txt\r\n", ok_reply(b"0123456789", 1_000_000)),
                ("GET b.txt\r\n", b"-ERR\r\n".to_vec()),
            ],
        );
        let names = vec!["a.txt".to_string(), " b.txt ".to_string()];
        let summary = run_session(&mut client, &names, &options(dir.path())).unwrap();
        drop(client);

        assert_eq!(summary.received(), 1);
        assert_eq!(
            summary.files[0].1,
            FileResult::Received {
                path: dir.path().join("a.txt"),
                size: 10,
                mtime: 1_000_000
            }
        );
        assert_eq!(summary.files[1], ("b.txt".to_string(), FileResult::ServerError("ERR".into())));
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"0123456789");

        let seen = handle.join().unwrap();
        assert_eq!(seen.last().unwrap(), "QUIT\r\n");
    }

    #[test]
    fn names_after_an_error_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(server, vec![("GET x\r\n", b"-ERR\r\n".to_vec())]);
        let names = vec!["x".to_string(), "y".to_string()];
        let summary = run_session(&mut client, &names, &options(dir.path())).unwrap();
        drop(client);
        assert!(matches!(summary.files[1].1, FileResult::Skipped(_)));
        let _ = handle.join().unwrap();
    }

    #[test]
    fn overlong_name_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(server, vec![("GET ok\r\n", ok_reply(b"", 0))]);
        let names = vec!["x".repeat(300), "ok".to_string()];
        let summary = run_session(&mut client, &names, &options(dir.path())).unwrap();
        drop(client);
        assert!(matches!(summary.files[0].1, FileResult::Skipped(_)));
        assert_eq!(summary.received(), 1);
        assert_eq!(std::fs::read(dir.path().join("ok")).unwrap(), b"");
        let _ = handle.join().unwrap();
    }

    #[test]
    fn preserve_applies_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(server, vec![("GET t\r\n", ok_reply(b"abc", 1_600_000_000))]);
        let opts = Options {
            preserve: true,
            ..options(dir.path())
        };
        let _ = run_session(&mut client, &["t".to_string()], &opts).unwrap();
        drop(client);
        let modified = std::fs::metadata(dir.path().join("t")).unwrap().modified().unwrap();
        assert_eq!(modified, UNIX_EPOCH + Duration::from_secs(1_600_000_000));
        let _ = handle.join().unwrap();
    }

    #[test]
    fn unknown_status_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, server) = UnixStream::pair().unwrap();
        let handle = fake_server(server, vec![("GET x\r\n", b"?".to_vec())]);
        let err = run_session(&mut client, &["x".to_string()], &options(dir.path())).unwrap_err();
        drop(client);
        assert!(matches!(err, ClientError::Protocol(Status::Unknown(b'?'))));
        let _ = handle.join().unwrap();
    }

    #[test]
    fn premature_close_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, mut server) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 7];
            server.read_exact(&mut buf).unwrap();
            // promise 10 bytes, deliver 3
            let mut reply = encode_ok_header(10, 0).to_vec();
            reply.extend_from_slice(b"abc");
            server.write_all(&reply).unwrap();
        });
        let err = run_session(&mut client, &["x".to_string()], &options(dir.path())).unwrap_err();
        assert!(matches!(err, ClientError::PrematureClose));
        handle.join().unwrap();
    }

    #[test]
    fn silent_server_stalls() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, _server) = UnixStream::pair().unwrap();
        let start = SystemTime::now();
        let err = run_session(&mut client, &["x".to_string()], &options(dir.path())).unwrap_err();
        assert!(matches!(err, ClientError::Stalled(_)));
        assert!(start.elapsed().unwrap() >= Duration::from_millis(350));
    }
}

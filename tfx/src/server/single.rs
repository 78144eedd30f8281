//! Serving a single connection
// (c) 2025 Ross Younger

use std::net::TcpStream;
use std::os::fd::AsFd as _;
use std::path::Path;

use anyhow::Context as _;
use tracing::debug;

use super::connection::{CloseReason, Outcome, serve_read, serve_write};
use super::registry::{ConnectionId, Registry};
use crate::config::Configuration;
use crate::util::io::{Interest, wait_ready};
use crate::util::socket::{SocketBuffers as _, chunk_size};

/// Serves one already-accepted connection until it closes or stalls.
///
/// This is the body of a per-connection child process. It waits for
/// readiness with the configured timeout; after `attempts` consecutive
/// timeouts the peer is considered stalled and the connection is dropped.
///
/// Returns the reason the connection ended.
pub fn serve_connection(
    stream: TcpStream,
    config: &Configuration,
    root: &Path,
) -> anyhow::Result<CloseReason> {
    let id = ConnectionId::new(std::process::id().into());
    stream
        .set_nonblocking(true)
        .context("failed to configure connection")?;
    let chunk = chunk_size(config.send_buffer, stream.get_sendbuf());
    if let Ok(peer) = stream.peer_addr() {
        debug!("{id}: serving {peer}");
    }

    let mut registry = Registry::new(1);
    registry.register(id)?;
    let mut stream = stream;
    let mut interest = Interest::READ;
    let mut misses = 0;

    let reason = loop {
        let readiness = wait_ready(
            &[(stream.as_fd(), interest)],
            Some(config.timeout_duration()),
        )
        .context("readiness wait failed")?
        .first()
        .copied()
        .unwrap_or_default();

        if !readiness.any() {
            misses += 1;
            if misses >= config.attempts {
                break CloseReason::Stalled;
            }
            debug!("{id}: no activity; waiting again");
            continue;
        }
        misses = 0;

        let outcome = if readiness.readable {
            serve_read(&mut registry, id, &mut stream, root)
        } else if readiness.writable && interest.write {
            serve_write(&mut registry, id, &mut stream, chunk)
        } else {
            continue;
        };
        match outcome {
            Outcome::Close(reason) => break reason,
            Outcome::OutputPending => interest = Interest::BOTH,
            Outcome::Done => interest = Interest::READ,
        }
    };
    let _ = registry.unregister(id);
    debug!("{id}: closed ({reason})");
    Ok(reason)
}

/// Serves the connection passed to this process as its standard input.
pub fn serve_stdin(config: &Configuration, root: &Path) -> anyhow::Result<CloseReason> {
    let fd = std::io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .context("standard input is not usable")?;
    serve_connection(TcpStream::from(fd), config, root)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::io::{Read as _, Write as _};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use pretty_assertions::assert_eq;

    use super::serve_connection;
    use crate::config::Configuration;
    use crate::protocol::encode_ok_header;
    use crate::server::connection::CloseReason;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn config(timeout: u64, attempts: u32) -> Configuration {
        Configuration {
            timeout,
            attempts,
            ..Configuration::system_default().clone()
        }
    }

    #[test]
    fn serves_until_quit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello"), b"hi there").unwrap();
        let root = dir.path().to_path_buf();
        let (mut client, server) = pair();
        let handle = thread::spawn(move || serve_connection(server, &config(5, 2), &root));

        client.write_all(b"GET hello\r\n").unwrap();
        let mut reply = [0u8; 13 + 8];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply[..5], &encode_ok_header(8, 0)[..5]);
        assert_eq!(&reply[13..], b"hi there");
        client.write_all(b"QUIT\r\n").unwrap();

        assert_eq!(handle.join().unwrap().unwrap(), CloseReason::Quit);
    }

    #[test]
    fn missing_file_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (mut client, server) = pair();
        let handle = thread::spawn(move || serve_connection(server, &config(5, 2), &root));

        client.write_all(b"GET nope\r\n").unwrap();
        let mut reply = Vec::new();
        let _ = client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"-ERR\r\n");
        assert_eq!(handle.join().unwrap().unwrap(), CloseReason::ErrorSent);
    }

    #[test]
    fn silent_peer_stalls() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (_client, server) = pair();
        let reason = serve_connection(server, &config(1, 2), &root).unwrap();
        assert_eq!(reason, CloseReason::Stalled);
    }
}

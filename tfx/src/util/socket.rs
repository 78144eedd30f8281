//! Socket wrangling
// (c) 2025 Ross Younger

use std::net::{Ipv4Addr, Ipv6Addr, TcpListener, TcpStream, ToSocketAddrs as _};
use std::os::fd::AsFd;
use std::time::Duration;

use anyhow::Context as _;
use human_repr::HumanCount as _;
use rustix::net::sockopt as RustixSO;
use tracing::{debug, warn};

/// Buffer size used when the kernel will not tell us
pub const FALLBACK_BUFFER_SIZE: usize = 8120;

/// How long each connection attempt may take
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

mod private {
    pub trait SealedSocket: std::os::fd::AsFd {}
    impl SealedSocket for std::net::TcpStream {}
    impl SealedSocket for std::net::TcpListener {}
}

/// Access to the kernel socket buffer sizes
///
/// **This is a sealed trait**: it is implemented for the std TCP types only.
pub trait SocketBuffers: private::SealedSocket {
    /// Wrapper for `getsockopt SO_SNDBUF`
    fn get_sendbuf(&self) -> std::io::Result<usize> {
        Ok(RustixSO::socket_send_buffer_size(self.as_fd())?)
    }
    /// Wrapper for `getsockopt SO_RCVBUF`
    fn get_recvbuf(&self) -> std::io::Result<usize> {
        Ok(RustixSO::socket_recv_buffer_size(self.as_fd())?)
    }
}

impl SocketBuffers for TcpStream {}
impl SocketBuffers for TcpListener {}

/// Picks a transfer chunk size.
///
/// A non-zero `configured` value wins. Otherwise the kernel's answer is used,
/// falling back to [`FALLBACK_BUFFER_SIZE`] if it is unavailable.
pub fn chunk_size(configured: usize, kernel: std::io::Result<usize>) -> usize {
    if configured > 0 {
        return configured;
    }
    match kernel {
        Ok(n) if n > 0 => n,
        Ok(_) => FALLBACK_BUFFER_SIZE,
        Err(e) => {
            warn!(
                "could not read socket buffer size ({e}); using {}",
                FALLBACK_BUFFER_SIZE.human_count_bytes()
            );
            FALLBACK_BUFFER_SIZE
        }
    }
}

/// Binds a listening socket on the wildcard address for `port`.
///
/// IPv6 (which on most systems also accepts IPv4) is tried first, then IPv4.
/// The standard library enables address reuse on listening sockets.
pub fn tcp_listen(port: u16) -> anyhow::Result<TcpListener> {
    match TcpListener::bind((Ipv6Addr::UNSPECIFIED, port)) {
        Ok(l) => Ok(l),
        Err(e6) => {
            debug!("IPv6 bind failed ({e6}); trying IPv4");
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
                .with_context(|| format!("failed to bind port {port}"))
        }
    }
}

/// Connects to `host:port`, trying every resolved address in turn.
pub fn tcp_connect(host: &str, port: u16, timeout: Duration) -> anyhow::Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}"))?;
    let mut last_error = None;
    for addr in addrs {
        debug!("connecting to {addr}");
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("connect to {addr} failed: {e}");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(e).with_context(|| format!("could not connect to {host} port {port}")),
        None => anyhow::bail!("{host} did not resolve to any addresses"),
    }
}

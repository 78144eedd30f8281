//! Single-threaded multiplexing server loop
// (c) 2025 Ross Younger

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::os::fd::AsFd as _;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tracing::{debug, error, info, warn};

use super::connection::{CloseReason, Outcome, serve_read, serve_write};
use super::registry::{ConnectionId, Registry};
use crate::config::Configuration;
use crate::util::io::{Interest, Readiness, wait_ready};
use crate::util::socket::{SocketBuffers as _, chunk_size};

/// A connection's socket and how we are currently watching it
#[derive(Debug)]
struct Endpoint {
    /// Non-blocking
    stream: TcpStream,
    interest: Interest,
    last_activity: Instant,
}

/// The multiplexing server
///
/// One thread serves every connection. Each turn of the loop waits for
/// readiness on the listening socket and all live connections, then performs
/// at most one action per ready connection.
#[derive(Debug)]
pub struct Dispatcher {
    listener: TcpListener,
    registry: Registry,
    /// Ordered by id, which is also accept order
    endpoints: BTreeMap<ConnectionId, Endpoint>,
    next_id: u64,
    root: PathBuf,
    chunk: usize,
    timeout: Duration,
    stall_limit: Duration,
}

impl Dispatcher {
    /// Sets up a dispatcher around a bound listening socket.
    pub fn new(
        listener: TcpListener,
        config: &Configuration,
        root: PathBuf,
    ) -> anyhow::Result<Self> {
        listener
            .set_nonblocking(true)
            .context("failed to configure listening socket")?;
        let chunk = chunk_size(config.send_buffer, listener.get_sendbuf());
        debug!("transfer chunk size is {chunk} bytes");
        Ok(Self {
            listener,
            registry: Registry::new(config.max_connections),
            endpoints: BTreeMap::new(),
            next_id: 1,
            root,
            chunk,
            timeout: config.timeout_duration(),
            stall_limit: config.stall_limit(),
        })
    }

    /// The connection table
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serves connections until the readiness wait fails.
    pub fn run(&mut self) -> anyhow::Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!("listening on {addr}");
        }
        loop {
            self.step()?;
        }
    }

    /// Performs one turn of the loop.
    ///
    /// Accepting takes priority over servicing existing connections, except
    /// when the registry is within one slot of capacity: then the existing
    /// connections go first.
    pub fn step(&mut self) -> anyhow::Result<()> {
        let waited = {
            let mut fds = Vec::with_capacity(self.endpoints.len() + 1);
            fds.push((self.listener.as_fd(), Interest::READ));
            fds.extend(
                self.endpoints
                    .values()
                    .map(|ep| (ep.stream.as_fd(), ep.interest)),
            );
            wait_ready(&fds, Some(self.timeout))
        };
        let ready = match waited {
            Ok(r) => r,
            Err(e) => {
                error!("readiness wait failed: {e}");
                self.shutdown();
                return Err(e).context("readiness wait failed");
            }
        };

        let listener_ready = ready.first().is_some_and(|r| r.readable);
        let connections: Vec<(ConnectionId, Readiness)> = self
            .endpoints
            .keys()
            .zip(ready.iter().skip(1))
            .map(|(id, r)| (*id, *r))
            .filter(|(_, r)| r.any())
            .collect();

        if listener_ready && !self.registry.is_near_capacity() {
            self.accept();
            return Ok(());
        }
        for (id, readiness) in connections {
            self.service(id, readiness);
        }
        if listener_ready {
            self.accept();
        }
        self.sweep_stalled();
        Ok(())
    }

    fn accept(&mut self) {
        let (stream, peer) = match self.listener.accept() {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!("accept failed: {e}");
                return;
            }
        };
        let id = ConnectionId::new(self.next_id);
        if let Err(e) = self.registry.register(id) {
            warn!("refusing connection from {peer}: {e}");
            return;
        }
        self.next_id += 1;
        if let Err(e) = stream.set_nonblocking(true) {
            warn!("refusing connection from {peer}: {e}");
            let _ = self.registry.unregister(id);
            return;
        }
        debug!("{id}: accepted from {peer}");
        let _ = self.endpoints.insert(
            id,
            Endpoint {
                stream,
                interest: Interest::READ,
                last_activity: Instant::now(),
            },
        );
    }

    /// Reads if readable, else writes if writable and there is output pending.
    fn service(&mut self, id: ConnectionId, readiness: Readiness) {
        let Some(ep) = self.endpoints.get_mut(&id) else {
            return;
        };
        let outcome = if readiness.readable {
            serve_read(&mut self.registry, id, &mut ep.stream, &self.root)
        } else if readiness.writable && ep.interest.write {
            serve_write(&mut self.registry, id, &mut ep.stream, self.chunk)
        } else {
            return;
        };
        ep.last_activity = Instant::now();
        match outcome {
            Outcome::Close(reason) => self.close(id, reason),
            Outcome::OutputPending => ep.interest = Interest::BOTH,
            Outcome::Done => ep.interest = Interest::READ,
        }
    }

    fn sweep_stalled(&mut self) {
        let now = Instant::now();
        let stalled: Vec<ConnectionId> = self
            .endpoints
            .iter()
            .filter(|(_, ep)| now.duration_since(ep.last_activity) >= self.stall_limit)
            .map(|(id, _)| *id)
            .collect();
        for id in stalled {
            self.close(id, CloseReason::Stalled);
        }
    }

    fn close(&mut self, id: ConnectionId, reason: CloseReason) {
        let _ = self.registry.unregister(id);
        if self.endpoints.remove(&id).is_some() {
            debug!("{id}: closed ({reason})");
        }
    }

    /// Releases every connection.
    fn shutdown(&mut self) {
        self.registry.clear();
        self.endpoints.clear();
    }
}

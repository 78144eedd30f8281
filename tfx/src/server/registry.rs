//! Per-connection state owned by the server
// (c) 2025 Ross Younger

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};

/// The most files one connection may have waiting to be sent
pub const MAX_QUEUED_FILES: usize = 64;

/// Opaque handle for a server-side connection
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    derive_more::From,
)]
#[display("conn#{_0}")]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw identifier
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Failures reported by the [`Registry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No more connections may be registered
    #[error("connection registry is full ({0} connections)")]
    Full(usize),
    /// The connection is already known
    #[error("{0} is already registered")]
    AlreadyRegistered(ConnectionId),
    /// The connection is not known
    #[error("{0} is not registered")]
    UnknownConnection(ConnectionId),
    /// The connection already has [`MAX_QUEUED_FILES`] files waiting
    #[error("{0} has too many requests outstanding")]
    QueueFull(ConnectionId),
    /// Memory for the request queue could not be obtained
    #[error("out of memory queueing a request")]
    Allocation,
}

/// The file currently being sent on a connection
#[derive(Debug)]
struct ActiveTransfer {
    file: File,
    remaining: u32,
}

/// Everything the server knows about one connection
///
/// A record holds at most one open file. The file is dropped (and so closed)
/// as soon as its last byte has been accepted by the socket, or when the
/// record itself is dropped.
///
/// Sockets are non-blocking, so a record also carries the bytes of a partly
/// received request and the bytes of a reply the socket has not yet taken.
#[derive(Debug, Default)]
pub struct ConnectionRecord {
    pending: VecDeque<PathBuf>,
    transfer: Option<ActiveTransfer>,
    error_pending: bool,
    input: Vec<u8>,
    output: Vec<u8>,
    /// How many bytes at the front of `output` are reply header
    output_header: usize,
}

impl ConnectionRecord {
    /// Is a negative reply owed to the peer?
    #[must_use]
    pub fn error_pending(&self) -> bool {
        self.error_pending
    }

    /// Marks that the next write must be a negative reply.
    /// Any file in progress is closed and any staged output discarded.
    pub fn set_error_pending(&mut self) {
        self.transfer = None;
        self.output.clear();
        self.output_header = 0;
        self.error_pending = true;
    }

    /// Is a file open?
    #[must_use]
    pub fn has_open_file(&self) -> bool {
        self.transfer.is_some()
    }

    /// Bytes of the open file the socket has not yet accepted (zero if no file is open)
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.transfer.as_ref().map_or(0, |t| t.remaining)
    }

    /// Installs a newly opened file with `size` bytes still to send.
    pub fn begin_transfer(&mut self, file: File, size: u32) {
        self.transfer = Some(ActiveTransfer {
            file,
            remaining: size,
        });
    }

    /// The open file, if any
    pub fn open_file(&mut self) -> Option<&mut File> {
        self.transfer.as_mut().map(|t| &mut t.file)
    }

    /// Records that `sent` bytes of file content went out.
    ///
    /// Returns true, and closes the file, when the transfer is complete.
    pub fn consume(&mut self, sent: u32) -> bool {
        let Some(transfer) = self.transfer.as_mut() else {
            return true;
        };
        transfer.remaining = transfer.remaining.saturating_sub(sent);
        if transfer.remaining == 0 {
            self.transfer = None;
            true
        } else {
            false
        }
    }

    /// Received bytes not yet parsed into a request
    #[must_use]
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// Mutable access to the unparsed input
    pub fn input_mut(&mut self) -> &mut Vec<u8> {
        &mut self.input
    }

    /// Reply bytes waiting for the socket
    #[must_use]
    pub fn pending_output(&self) -> &[u8] {
        &self.output
    }

    /// Is part of a reply still waiting for the socket?
    #[must_use]
    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Stages a reply: `header` followed by `payload` bytes of the open file.
    pub fn stage_output(&mut self, header: &[u8], payload: &[u8]) {
        self.output.clear();
        self.output.extend_from_slice(header);
        self.output.extend_from_slice(payload);
        self.output_header = header.len();
    }

    /// Records that the socket accepted the first `sent` staged bytes.
    ///
    /// Only file content counts against [`remaining`](Self::remaining).
    /// Returns true, and closes the file, when the transfer is complete.
    pub fn output_sent(&mut self, sent: usize) -> bool {
        let sent = sent.min(self.output.len());
        let _ = self.output.drain(..sent);
        let header = sent.min(self.output_header);
        self.output_header -= header;
        let payload = u32::try_from(sent - header).unwrap_or(u32::MAX);
        let finished = self.consume(payload);
        finished && self.output.is_empty()
    }

    /// Holds if the record is internally consistent.
    /// An open file always has bytes left to send, and staged file content
    /// never exceeds them.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let staged = self.output.len() - self.output_header;
        match &self.transfer {
            Some(t) => {
                t.remaining > 0 && staged <= usize::try_from(t.remaining).unwrap_or(usize::MAX)
            }
            None => staged == 0,
        }
    }
}

/// The server's table of live connections
///
/// This is the single owner of per-connection state. Unregistering a
/// connection drops its record, which releases its queue and closes any
/// open file.
#[derive(Debug)]
pub struct Registry {
    records: HashMap<ConnectionId, ConnectionRecord>,
    capacity: usize,
}

impl Registry {
    /// Creates an empty registry that holds at most `capacity` connections
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            capacity,
        }
    }

    /// Maximum number of connections
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Are there no live connections?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Is the registry within one slot of its capacity (or full)?
    #[must_use]
    pub fn is_near_capacity(&self) -> bool {
        self.records.len() + 1 >= self.capacity
    }

    /// Is the registry full?
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Is this connection registered?
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.records.contains_key(&id)
    }

    /// Creates an empty record for a newly accepted connection.
    pub fn register(&mut self, id: ConnectionId) -> Result<(), RegistryError> {
        if self.records.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        if self.is_full() {
            return Err(RegistryError::Full(self.capacity));
        }
        self.records
            .try_reserve(1)
            .map_err(|_| RegistryError::Allocation)?;
        let _ = self.records.insert(id, ConnectionRecord::default());
        Ok(())
    }

    /// Drops the record for a connection, closing any open file.
    ///
    /// Returns whether a record existed. Unregistering an unknown
    /// connection is harmless.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        self.records.remove(&id).is_some()
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Appends a resolved filename to a connection's queue.
    ///
    /// At most [`MAX_QUEUED_FILES`] may be waiting at once.
    pub fn enqueue_file(&mut self, id: ConnectionId, path: PathBuf) -> Result<(), RegistryError> {
        let record = self.record_mut(id)?;
        if record.pending.len() >= MAX_QUEUED_FILES {
            return Err(RegistryError::QueueFull(id));
        }
        record
            .pending
            .try_reserve(1)
            .map_err(|_| RegistryError::Allocation)?;
        record.pending.push_back(path);
        Ok(())
    }

    /// The next file to send on a connection, if any
    #[must_use]
    pub fn peek_next_file(&self, id: ConnectionId) -> Option<&Path> {
        self.records
            .get(&id)
            .and_then(|r| r.pending.front())
            .map(PathBuf::as_path)
    }

    /// Removes and returns the head of a connection's queue.
    pub fn pop_file(&mut self, id: ConnectionId) -> Option<PathBuf> {
        self.records.get_mut(&id).and_then(|r| r.pending.pop_front())
    }

    /// Does a connection have queued files?
    #[must_use]
    pub fn has_more_files(&self, id: ConnectionId) -> bool {
        self.records.get(&id).is_some_and(|r| !r.pending.is_empty())
    }

    /// Read-only access to a record
    #[must_use]
    pub fn record(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.records.get(&id)
    }

    /// Mutable access to a record
    pub fn record_mut(&mut self, id: ConnectionId) -> Result<&mut ConnectionRecord, RegistryError> {
        self.records
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))
    }

    /// Identifiers of all live connections, in no particular order
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.records.keys().copied()
    }
}

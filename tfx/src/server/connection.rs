//! Per-connection request and reply handling
//!
//! The server calls [`serve_read`] when a connection is readable and
//! [`serve_write`] when it is writable. Each call performs at most one
//! read or one write on the socket, which is expected to be non-blocking,
//! then tells the caller what to do next via an [`Outcome`]. All state
//! between calls lives in the [`Registry`], including partly received
//! requests and output the socket has not yet taken.
// (c) 2025 Ross Younger

use std::ffi::OsStr;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::ffi::OsStrExt as _;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, trace, warn};

use super::registry::{ConnectionId, Registry};
use crate::protocol::{ERR_REPLY, OkHeader, Request, parse_request};

/// Why a connection should be torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum CloseReason {
    /// The peer sent `QUIT`
    #[display("client quit")]
    Quit,
    /// The peer closed the connection or sent a partial request
    #[display("peer closed connection")]
    PeerClosed,
    /// A negative reply has been sent (or its sending failed)
    #[display("error reply sent")]
    ErrorSent,
    /// A socket write failed
    #[display("transport error")]
    Transport,
    /// The peer went quiet for too long
    #[display("stalled")]
    Stalled,
    /// The connection has no registry record
    #[display("not registered")]
    Unregistered,
}

/// What the caller should do with a connection after servicing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Unregister and close the connection
    Close(CloseReason),
    /// There is output to send; watch for both read and write readiness
    OutputPending,
    /// Nothing more to send; watch for read readiness only
    Done,
}

/// Reasons a requested file cannot be served
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The underlying filesystem operation failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Directories are not servable
    #[error("is a directory")]
    Directory,
    /// The size does not fit the 32-bit size field
    #[error("too large to serve ({0} bytes)")]
    TooLarge(u64),
    /// The modification time does not fit the 32-bit timestamp field
    #[error("modification time is out of range")]
    Timestamp,
}

/// Maps a requested filename onto the filesystem.
#[must_use]
pub fn resolve(root: &Path, name: &[u8]) -> PathBuf {
    root.join(OsStr::from_bytes(name))
}

/// Opens a file and builds the positive reply header describing it.
pub fn open_for_sending(path: &Path) -> Result<(File, OkHeader), OpenError> {
    let file = File::open(path)?;
    let meta = file.metadata()?;
    if meta.is_dir() {
        return Err(OpenError::Directory);
    }
    let size = u32::try_from(meta.len()).map_err(|_| OpenError::TooLarge(meta.len()))?;
    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map_err(|_| OpenError::Timestamp)?
        .as_secs();
    let mtime = u32::try_from(mtime).map_err(|_| OpenError::Timestamp)?;
    Ok((file, OkHeader::new(size, mtime)))
}

/// Most bytes taken from a readable connection in one go
const READ_CHUNK: usize = 4096;

/// Handles input on a readable connection.
///
/// Performs a single read, which must not block, and acts on every request
/// the received bytes complete. A partial request is kept in the registry
/// until more input arrives.
pub fn serve_read<R: Read>(
    registry: &mut Registry,
    id: ConnectionId,
    reader: &mut R,
    root: &Path,
) -> Outcome {
    let Ok(record) = registry.record_mut(id) else {
        return Outcome::Close(CloseReason::Unregistered);
    };
    let mut buf = [0u8; READ_CHUNK];
    match reader.read(&mut buf) {
        Ok(0) => {
            if !record.input().is_empty() {
                debug!("{id}: closed part way through a request");
            }
            return Outcome::Close(CloseReason::PeerClosed);
        }
        Ok(n) => {
            if !record.error_pending() {
                record.input_mut().extend_from_slice(&buf[..n]);
            }
        }
        Err(e) if is_transient(&e) => return next_step(registry, id),
        Err(e) => {
            debug!("{id}: read failed: {e}");
            return Outcome::Close(CloseReason::PeerClosed);
        }
    }

    while let Some((request, used)) = registry
        .record(id)
        .and_then(|r| parse_request(r.input()))
    {
        if let Ok(record) = registry.record_mut(id) {
            let _ = record.input_mut().drain(..used);
        }
        match request {
            Request::Quit => return Outcome::Close(CloseReason::Quit),
            Request::Get(name) => {
                let path = resolve(root, &name);
                trace!("{id}: GET {}", path.display());
                let result = match std::fs::metadata(&path) {
                    Ok(_) => registry.enqueue_file(id, path).map_err(anyhow::Error::from),
                    Err(e) => Err(anyhow::Error::from(e).context(format!("{}", path.display()))),
                };
                if let Err(e) = result {
                    warn!("{id}: {e:#}");
                    set_error_pending(registry, id);
                    break;
                }
            }
            Request::Malformed => {
                debug!("{id}: malformed request");
                set_error_pending(registry, id);
                break;
            }
        }
    }
    next_step(registry, id)
}

fn set_error_pending(registry: &mut Registry, id: ConnectionId) {
    if let Ok(record) = registry.record_mut(id) {
        record.set_error_pending();
        record.input_mut().clear();
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Whether the connection has anything left to write
fn next_step(registry: &Registry, id: ConnectionId) -> Outcome {
    let Some(record) = registry.record(id) else {
        return Outcome::Close(CloseReason::Unregistered);
    };
    if record.error_pending()
        || record.has_pending_output()
        || record.has_open_file()
        || registry.has_more_files(id)
    {
        Outcome::OutputPending
    } else {
        Outcome::Done
    }
}

/// Sends the next piece of output on a writable connection.
///
/// Performs a single write, which must not block. Output the socket does not
/// take stays staged in the registry for the next call; only file content
/// the socket has accepted counts as sent. `chunk` is the most bytes staged
/// at once, header included.
pub fn serve_write<W: Write>(
    registry: &mut Registry,
    id: ConnectionId,
    writer: &mut W,
    chunk: usize,
) -> Outcome {
    let Some(record) = registry.record(id) else {
        return Outcome::Close(CloseReason::Unregistered);
    };
    if !record.has_pending_output() {
        if record.error_pending() {
            match writer.write(ERR_REPLY) {
                Ok(n) if n == ERR_REPLY.len() => (),
                Ok(n) => debug!("{id}: error reply cut short after {n} bytes"),
                Err(e) => debug!("{id}: failed to send error reply: {e}"),
            }
            return Outcome::Close(CloseReason::ErrorSent);
        }
        if let Some(outcome) = stage_next(registry, id, chunk) {
            return outcome;
        }
    }

    let Ok(record) = registry.record_mut(id) else {
        return Outcome::Close(CloseReason::Unregistered);
    };
    match writer.write(record.pending_output()) {
        Ok(0) => {
            debug!("{id}: socket accepted no data");
            return Outcome::Close(CloseReason::Transport);
        }
        Ok(n) => {
            if record.output_sent(n) {
                trace!("{id}: file complete");
            }
        }
        Err(e) if is_transient(&e) => return Outcome::OutputPending,
        Err(e) => {
            debug!("{id}: write failed: {e}");
            return Outcome::Close(CloseReason::Transport);
        }
    }
    next_step(registry, id)
}

/// Stages the next chunk of output, opening the next queued file if none is open.
///
/// Returns an outcome if there is nothing to write after all.
fn stage_next(registry: &mut Registry, id: ConnectionId, chunk: usize) -> Option<Outcome> {
    let Some(record) = registry.record(id) else {
        return Some(Outcome::Close(CloseReason::Unregistered));
    };
    let mut header = None;
    if !record.has_open_file() {
        let Some(path) = registry.peek_next_file(id).map(Path::to_path_buf) else {
            return Some(Outcome::Done);
        };
        let opened = open_for_sending(&path);
        let _ = registry.pop_file(id);
        let Ok(record) = registry.record_mut(id) else {
            return Some(Outcome::Close(CloseReason::Unregistered));
        };
        match opened {
            Ok((file, h)) => {
                debug!("{id}: sending {} ({} bytes)", path.display(), h.size);
                if h.size > 0 {
                    record.begin_transfer(file, h.size);
                }
                header = Some(h.encode());
            }
            Err(e) => {
                warn!("{id}: {}: {e}", path.display());
                record.set_error_pending();
                return Some(Outcome::OutputPending);
            }
        }
    }

    let Ok(record) = registry.record_mut(id) else {
        return Some(Outcome::Close(CloseReason::Unregistered));
    };
    let header: &[u8] = match &header {
        Some(h) => h,
        None => &[],
    };
    let remaining = record.remaining();
    let room = u64::try_from(chunk.saturating_sub(header.len())).unwrap_or(u64::MAX);
    let want = u64::from(remaining).min(room);

    let mut payload = Vec::new();
    if want > 0 {
        let Some(file) = record.open_file() else {
            return Some(Outcome::Close(CloseReason::Unregistered));
        };
        match file.take(want).read_to_end(&mut payload) {
            Ok(0) => {
                warn!("{id}: file ended {remaining} bytes early");
                record.set_error_pending();
                return Some(Outcome::OutputPending);
            }
            Ok(_) => (),
            Err(e) => {
                warn!("{id}: file read failed: {e}");
                record.set_error_pending();
                return Some(Outcome::OutputPending);
            }
        }
    }
    record.stage_output(header, &payload);
    None
}

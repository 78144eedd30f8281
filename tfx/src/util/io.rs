//! Readiness waiting
// (c) 2025 Ross Younger

use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use rustix::event::{PollFd, PollFlags, Timespec, poll};
use rustix::io::Errno;

/// What a caller wants to hear about on a descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    /// Wake when data (or EOF, or an error) is available to read
    pub read: bool,
    /// Wake when the descriptor can accept more output
    pub write: bool,
}

impl Interest {
    /// Read interest only
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    /// Read and write interest
    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    fn flags(self) -> PollFlags {
        let mut flags = PollFlags::empty();
        if self.read {
            flags |= PollFlags::IN;
        }
        if self.write {
            flags |= PollFlags::OUT;
        }
        flags
    }
}

/// What a descriptor turned out to be ready for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// A read will not block
    pub readable: bool,
    /// A write will not block
    pub writable: bool,
}

impl Readiness {
    /// Is the descriptor ready for anything?
    #[must_use]
    pub fn any(self) -> bool {
        self.readable || self.writable
    }

    fn from_revents(revents: PollFlags) -> Self {
        // Hangups and errors are reported through the read path, which then discovers EOF or the error.
        Self {
            readable: revents.intersects(PollFlags::IN | PollFlags::HUP | PollFlags::ERR),
            writable: revents.contains(PollFlags::OUT),
        }
    }
}

fn to_timespec(timeout: Duration) -> Timespec {
    Timespec {
        tv_sec: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        tv_nsec: timeout.subsec_nanos().into(),
    }
}

/// Waits until at least one of a set of descriptors is ready, or the timeout elapses.
///
/// Returns one [`Readiness`] per input descriptor, in the same order.
/// If the timeout elapsed, every entry reports not ready.
/// A timeout of `None` waits indefinitely.
/// Interrupted waits are restarted.
pub fn wait_ready(
    fds: &[(BorrowedFd<'_>, Interest)],
    timeout: Option<Duration>,
) -> std::io::Result<Vec<Readiness>> {
    let mut pollfds: Vec<PollFd<'_>> = fds
        .iter()
        .map(|(fd, interest)| PollFd::from_borrowed_fd(*fd, interest.flags()))
        .collect();
    let timespec = timeout.map(to_timespec);
    loop {
        match poll(&mut pollfds, timespec.as_ref()) {
            Ok(_) => break,
            Err(Errno::INTR) => (),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(pollfds
        .iter()
        .map(|p| Readiness::from_revents(p.revents()))
        .collect())
}

/// Waits until a single descriptor is readable, or the timeout elapses.
///
/// Returns false on timeout.
pub fn wait_readable<F: AsFd>(fd: &F, timeout: Duration) -> std::io::Result<bool> {
    let ready = wait_ready(&[(fd.as_fd(), Interest::READ)], Some(timeout))?;
    Ok(ready.first().is_some_and(|r| r.readable))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use std::io::Write as _;
    use std::os::fd::AsFd as _;
    use std::os::unix::net::UnixStream;
    use std::time::{Duration, Instant};

    use assertables::assert_ge;
    use pretty_assertions::assert_eq;

    use super::{Interest, Readiness, wait_readable, wait_ready};

    #[test]
    fn timeout_reports_nothing_ready() {
        let (a, _b) = UnixStream::pair().unwrap();
        let start = Instant::now();
        assert!(!wait_readable(&a, Duration::from_millis(50)).unwrap());
        assert_ge!(start.elapsed(), Duration::from_millis(40));
    }

    #[test]
    fn data_makes_readable() {
        let (a, mut b) = UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();
        assert!(wait_readable(&a, Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn hangup_makes_readable() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        assert!(wait_readable(&a, Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn set_preserves_order() {
        let (a, _a2) = UnixStream::pair().unwrap();
        let (b, mut b2) = UnixStream::pair().unwrap();
        b2.write_all(b"y").unwrap();
        let ready = wait_ready(
            &[(a.as_fd(), Interest::READ), (b.as_fd(), Interest::BOTH)],
            Some(Duration::from_secs(1)),
        )
        .unwrap();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0], Readiness::default());
        assert_eq!(
            ready[1],
            Readiness {
                readable: true,
                writable: true
            }
        );
    }
}

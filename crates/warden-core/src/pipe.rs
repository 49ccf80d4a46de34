//! Pipes and descriptor mode helpers.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use warden_common::error::{Result, WardenError};

/// Both ends of an OS pipe.
///
/// Ends are close-on-exec, so a child only inherits the ends explicitly
/// installed as its stdio.
#[derive(Debug)]
pub struct Pipe {
    /// The end bytes are read from.
    pub read: OwnedFd,
    /// The end bytes are written to.
    pub write: OwnedFd,
}

impl Pipe {
    /// Creates a new close-on-exec pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if `pipe2(2)` fails (e.g. descriptor exhaustion).
    pub fn new() -> Result<Self> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| WardenError::io("pipe2", io::Error::from(e)))?;
        Ok(Self { read, write })
    }
}

/// Clears `O_NONBLOCK` on a descriptor.
///
/// Passed descriptors and inherited stdio may arrive in non-blocking mode;
/// the relays copy with plain blocking reads and writes.
///
/// # Errors
///
/// Returns an error if either `fcntl(2)` call fails.
pub fn set_blocking(fd: BorrowedFd<'_>) -> Result<()> {
    let fail = |e: Errno| WardenError::io(format!("fd {}", fd.as_raw_fd()), io::Error::from(e));
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL).map_err(fail)?);
    if !flags.contains(OFlag::O_NONBLOCK) {
        return Ok(());
    }
    let _ = fcntl(fd, FcntlArg::F_SETFL(flags - OFlag::O_NONBLOCK)).map_err(fail)?;
    tracing::trace!(fd = fd.as_raw_fd(), "cleared O_NONBLOCK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::fd::AsFd;

    use nix::fcntl::FdFlag;

    use super::*;

    fn is_nonblocking(fd: BorrowedFd<'_>) -> bool {
        let flags = fcntl(fd, FcntlArg::F_GETFL).expect("F_GETFL");
        OFlag::from_bits_truncate(flags).contains(OFlag::O_NONBLOCK)
    }

    #[test]
    fn pipe_carries_bytes() {
        let pipe = Pipe::new().expect("pipe");
        let mut writer = std::fs::File::from(pipe.write);
        writer.write_all(b"hello").expect("write");
        drop(writer);

        let mut out = Vec::new();
        let _ = std::fs::File::from(pipe.read)
            .read_to_end(&mut out)
            .expect("read");
        assert_eq!(out, b"hello");
    }

    #[test]
    fn pipe_ends_are_close_on_exec() {
        let pipe = Pipe::new().expect("pipe");
        let flags = fcntl(&pipe.read, FcntlArg::F_GETFD).expect("F_GETFD");
        assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
    }

    #[test]
    fn set_blocking_clears_nonblock() {
        let pipe = Pipe::new().expect("pipe");
        let _ = fcntl(&pipe.read, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).expect("F_SETFL");
        assert!(is_nonblocking(pipe.read.as_fd()));

        set_blocking(pipe.read.as_fd()).expect("set blocking");
        assert!(!is_nonblocking(pipe.read.as_fd()));
    }

    #[test]
    fn set_blocking_is_idempotent() {
        let pipe = Pipe::new().expect("pipe");
        set_blocking(pipe.write.as_fd()).expect("first");
        set_blocking(pipe.write.as_fd()).expect("second");
        assert!(!is_nonblocking(pipe.write.as_fd()));
    }
}

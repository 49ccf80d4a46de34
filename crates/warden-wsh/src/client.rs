//! Talking to `wshd` and relaying the remote process's stdio.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;

use warden_common::constants::PASSED_HANDLE_COUNT;
use warden_common::error::{Result, WardenError};
use warden_core::handles;
use warden_core::pipe::set_blocking;
use warden_core::protocol::{self, ExitStatusMessage, RunRequest, RunResponse};

const RESPONSE_BUF_LEN: usize = 1024;

/// A process started by the daemon, seen through the four descriptors it
/// passed back.
#[derive(Debug)]
pub struct RemoteProcess {
    /// Write end of the process's stdin.
    pub stdin: File,
    /// Read end of the process's stdout.
    pub stdout: File,
    /// Read end of the process's stderr.
    pub stderr: File,
    /// Read end of the status pipe; carries one exit status record.
    pub status: File,
}

impl RemoteProcess {
    /// Connects to the daemon at `socket` and asks it to run `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot be reached, its reply cannot be
    /// decoded, or it passes anything other than exactly four descriptors.
    pub fn start(socket: &Path, request: &RunRequest) -> Result<Self> {
        let mut conn = UnixStream::connect(socket).map_err(|e| WardenError::io(socket, e))?;
        protocol::write_frame(&mut conn, request)?;

        let mut buf = [0u8; RESPONSE_BUF_LEN];
        let received = handles::receive_handles(conn.as_fd(), &mut buf)?;
        let _: RunResponse = protocol::decode_frame(&buf[..received.len])?;

        let count = received.handles.len();
        let [stdin, stdout, stderr, status]: [OwnedFd; PASSED_HANDLE_COUNT] =
            received.handles.try_into().map_err(|_| {
                WardenError::protocol(format!(
                    "invalid number of descriptors; need {PASSED_HANDLE_COUNT}, got {count}"
                ))
            })?;
        for fd in [&stdin, &stdout, &stderr, &status] {
            set_blocking(fd.as_fd())?;
        }
        tracing::debug!(socket = %socket.display(), "remote process started");

        Ok(Self {
            stdin: File::from(stdin),
            stdout: File::from(stdout),
            stderr: File::from(stderr),
            status: File::from(status),
        })
    }

    /// Relays local stdio to the remote process until its output ends, then
    /// returns its exit status.
    ///
    /// Input is copied on a detached thread, since local stdin may stay open
    /// long after the remote process is gone. Both output streams are drained
    /// completely before the status is read.
    ///
    /// # Errors
    ///
    /// Returns an error if relaying output fails or the status pipe closes
    /// without a well-formed exit status.
    pub fn relay<I, O, E>(self, input: I, output: &mut O, errors: &mut E) -> Result<i32>
    where
        I: Read + Send + 'static,
        O: Write + Send,
        E: Write + Send,
    {
        let Self {
            stdin,
            mut stdout,
            mut stderr,
            mut status,
        } = self;

        let feeder = thread::Builder::new()
            .name("wsh-stdin".into())
            .spawn(move || feed_stdin(input, stdin));
        if let Err(e) = feeder {
            return Err(WardenError::io("wsh-stdin", e));
        }

        thread::scope(|scope| {
            let out = scope.spawn(|| copy_and_flush(&mut stdout, output));
            let err = scope.spawn(|| copy_and_flush(&mut stderr, errors));
            let out = out.join().unwrap_or_else(|_| Err(panicked("stdout")));
            let err = err.join().unwrap_or_else(|_| Err(panicked("stderr")));
            out.map_err(|e| WardenError::io("stdout", e))?;
            err.map_err(|e| WardenError::io("stderr", e))
        })?;

        let message: ExitStatusMessage = protocol::read_frame(&mut status)?;
        Ok(message.exit_status)
    }
}

/// Puts this process's own stdio into blocking mode.
///
/// # Errors
///
/// Returns an error if any of stdin, stdout or stderr cannot be switched,
/// for example because it is closed.
pub fn block_local_stdio() -> Result<()> {
    let (stdin, stdout, stderr) = (io::stdin(), io::stdout(), io::stderr());
    for fd in [stdin.as_fd(), stdout.as_fd(), stderr.as_fd()] {
        set_blocking(fd)?;
    }
    Ok(())
}

fn feed_stdin<I: Read>(mut input: I, mut stdin: File) {
    match io::copy(&mut input, &mut stdin) {
        Ok(bytes) => tracing::debug!(bytes, "local stdin closed"),
        // the remote side stopped reading; nothing left to feed
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
        Err(e) => tracing::warn!(error = %e, "relaying stdin failed"),
    }
}

fn copy_and_flush<R: Read, W: Write>(from: &mut R, to: &mut W) -> io::Result<()> {
    let _ = io::copy(from, to)?;
    to.flush()
}

fn panicked(stream: &str) -> io::Error {
    io::Error::other(format!("{stream} relay panicked"))
}

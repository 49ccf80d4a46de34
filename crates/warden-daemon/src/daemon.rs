//! Accept loop and per-connection request handling.

use std::fs::File;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::thread;

use warden_common::constants::START_FAILURE_STATUS;
use warden_common::error::{Result, WardenError};
use warden_core::handles;
use warden_core::pipe::Pipe;
use warden_core::process::exit_code;
use warden_core::protocol::{self, ExitStatusMessage, RunRequest, RunResponse};

use crate::launch::{self, ChildStdio};

/// The execution daemon, bound to its listening socket.
#[derive(Debug)]
pub struct Daemon {
    listener: UnixListener,
}

impl Daemon {
    /// Wraps an already-listening socket.
    #[must_use]
    pub const fn new(listener: UnixListener) -> Self {
        Self { listener }
    }

    /// Binds a new listening socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound (e.g. the path exists).
    pub fn bind(path: &Path) -> Result<Self> {
        let listener = UnixListener::bind(path).map_err(|e| WardenError::io(path, e))?;
        tracing::info!(socket = %path.display(), "daemon listening");
        Ok(Self::new(listener))
    }

    /// Adopts a listening socket inherited from the container bootstrapper.
    #[must_use]
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self::new(UnixListener::from(fd))
    }

    /// Returns the filesystem path of the socket, if it has one.
    #[must_use]
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.listener
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(Path::to_path_buf))
    }

    /// Serves connections forever on the calling thread.
    ///
    /// Each connection is handled on its own thread; a failing connection
    /// is logged and dropped without affecting the others.
    pub fn run(&self) {
        for conn in self.listener.incoming() {
            match conn {
                Ok(conn) => {
                    let spawned = thread::Builder::new()
                        .name("wshd-conn".into())
                        .spawn(move || {
                            if let Err(e) = serve_connection(conn) {
                                tracing::warn!(error = %e, "connection aborted");
                            }
                        });
                    if let Err(e) = spawned {
                        tracing::warn!(error = %e, "failed to spawn connection handler");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "daemon error accepting connection"),
            }
        }
    }

    /// Serves connections on a background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept thread cannot be spawned.
    pub fn start(self) -> Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("wshd-accept".into())
            .spawn(move || self.run())
            .map_err(|e| WardenError::io("wshd-accept", e))
    }
}

/// Handles one run request from start to exit status.
///
/// # Errors
///
/// Returns an error if the request cannot be decoded, a pipe cannot be
/// created, or the descriptors cannot be passed back. Failures to start the
/// program are not errors here; they are reported on the status pipe.
pub fn serve_connection(mut conn: UnixStream) -> Result<()> {
    let request: RunRequest = protocol::read_frame(&mut conn)?;
    tracing::debug!(user = %request.user, argv = ?request.argv, "run request");

    let stdin = Pipe::new()?;
    let stdout = Pipe::new()?;
    let stderr = Pipe::new()?;
    let status = Pipe::new()?;

    let response = protocol::encode_frame(&RunResponse {})?;
    handles::send_handles(
        conn.as_fd(),
        &response,
        &[
            stdin.write.as_fd(),
            stdout.read.as_fd(),
            stderr.read.as_fd(),
            status.read.as_fd(),
        ],
    )?;
    drop(conn);

    // the peer owns these ends now
    drop(stdin.write);
    drop(stdout.read);
    drop(stderr.read);
    drop(status.read);

    let status_pipe = File::from(status.write);
    let stdio = ChildStdio {
        stdin: stdin.read,
        stdout: stdout.write,
        stderr: stderr.write,
    };

    match launch::start(&request, stdio) {
        Ok(child) => wait_and_report(child, status_pipe),
        Err(e) => {
            tracing::warn!(error = %e, user = %request.user, "command not started");
            write_status(status_pipe, START_FAILURE_STATUS);
        }
    }
    Ok(())
}

fn wait_and_report(mut child: Child, status_pipe: File) {
    let pid = child.id();
    let exit_status = match child.wait() {
        Ok(status) => exit_code(status),
        Err(e) => {
            tracing::warn!(pid, error = %e, "failed waiting for command");
            START_FAILURE_STATUS
        }
    };
    tracing::info!(pid, exit_status, "command exited");
    write_status(status_pipe, exit_status);
}

fn write_status(mut status_pipe: File, exit_status: i32) {
    if let Err(e) = protocol::write_frame(&mut status_pipe, &ExitStatusMessage { exit_status }) {
        tracing::warn!(error = %e, "failed writing exit status");
    }
}

//! The command-execution abstraction the job tracker and quota manager run
//! processes through.
//!
//! Everything that starts a process goes through [`CommandRunner`], so tests
//! can swap in [`fake::FakeCommandRunner`] and assert on what would have run.

pub mod fake;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use warden_common::types::JobId;
use warden_core::process::exit_code;

/// A command to run, described independently of how it will be started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobCommand {
    /// Program to execute; resolved against `PATH` if it has no slash.
    pub program: PathBuf,
    /// Arguments, not including the program itself.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory, if not inherited.
    pub dir: Option<PathBuf>,
    /// Bytes fed to the process's stdin, which is then closed.
    pub stdin: Option<Bytes>,
}

impl JobCommand {
    /// Creates a command running `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Sets the bytes fed to stdin.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<Bytes>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Builds the command that runs `argv` as `user` inside a container,
    /// through the container's `wsh` and daemon socket.
    #[must_use]
    pub fn through_wsh(wsh: &Path, socket: &Path, user: &str, argv: &[String]) -> Self {
        Self::new(wsh)
            .arg("--socket")
            .arg(socket.to_string_lossy())
            .arg("--user")
            .arg(user)
            .arg("--")
            .args(argv.iter().cloned())
    }

    /// Returns the command line as a single string, for logs and errors.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status; `128 + n` when killed by signal `n`.
    pub status: i32,
    /// Everything written to stdout.
    pub stdout: Bytes,
    /// Everything written to stderr.
    pub stderr: Bytes,
}

/// One of a running process's output pipes.
pub type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// A started process: its output pipes and a future resolving to its exit
/// status.
pub struct Process {
    /// Read end of stdout, if captured.
    pub stdout: Option<OutputReader>,
    /// Read end of stderr, if captured.
    pub stderr: Option<OutputReader>,
    /// Resolves once the process has exited.
    pub exit: BoxFuture<'static, io::Result<i32>>,
}

impl Process {
    /// Reads both pipes to the end and waits for the exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if reading either pipe or waiting fails.
    pub async fn wait_with_output(self) -> io::Result<CommandOutput> {
        let Self {
            stdout,
            stderr,
            exit,
        } = self;
        let (stdout, stderr) = tokio::try_join!(read_to_end(stdout), read_to_end(stderr))?;
        let status = exit.await?;
        Ok(CommandOutput {
            status,
            stdout,
            stderr,
        })
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

async fn read_to_end(reader: Option<OutputReader>) -> io::Result<Bytes> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await?;
    }
    Ok(Bytes::from(buf))
}

/// Starts processes on behalf of the backend.
pub trait CommandRunner: Send + Sync {
    /// Starts `command` and returns once it is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn spawn(&self, command: &JobCommand) -> io::Result<Process>;

    /// Reconnects to the process of a job that was running before the
    /// tracker restarted.
    ///
    /// # Errors
    ///
    /// The default implementation cannot reattach and always fails.
    fn reattach(&self, id: JobId) -> io::Result<Process> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot reattach to job {id}"),
        ))
    }

    /// Runs `command` to completion, capturing its output.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// [`CommandOutput::status`].
    fn run(&self, command: &JobCommand) -> BoxFuture<'static, io::Result<CommandOutput>> {
        match self.spawn(command) {
            Ok(process) => process.wait_with_output().boxed(),
            Err(e) => futures::future::ready(Err(e)).boxed(),
        }
    }
}

/// Runs commands as child processes of the current process.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
    fn spawn(&self, command: &JobCommand) -> io::Result<Process> {
        let mut cmd = tokio::process::Command::new(&command.program);
        let _ = cmd
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &command.dir {
            let _ = cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        tracing::debug!(
            pid = ?child.id(),
            command = %command.command_line(),
            "spawned process"
        );

        if let (Some(mut pipe), Some(input)) = (child.stdin.take(), command.stdin.clone()) {
            let _ = tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    tracing::debug!(error = %e, "feeding stdin failed");
                }
            });
        }

        let stdout = child.stdout.take().map(|pipe| Box::new(pipe) as OutputReader);
        let stderr = child.stderr.take().map(|pipe| Box::new(pipe) as OutputReader);
        let exit = async move { child.wait().await.map(exit_code) }.boxed();

        Ok(Process {
            stdout,
            stderr,
            exit,
        })
    }
}
